use std::fmt;

use crate::error::ConfigError;

/// ISO 3166-1 alpha-2 country code, always stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CountryCode(String);

impl CountryCode {
    /// Parses a two-letter code, ignoring surrounding whitespace and case.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let code = raw.trim();
        if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(ConfigError::InvalidCountry(raw.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_case_and_whitespace() {
        assert_eq!(CountryCode::parse(" us ").unwrap().as_str(), "US");
        assert_eq!(CountryCode::parse("De").unwrap().to_string(), "DE");
    }

    #[test]
    fn test_parse_rejects_names_and_bad_lengths() {
        for raw in ["", "U", "USA", "Germany", "1A", "é1"] {
            assert!(
                matches!(CountryCode::parse(raw), Err(ConfigError::InvalidCountry(_))),
                "{raw:?} should be rejected"
            );
        }
    }
}
