//! Responses for denied and unresolvable requests.

use std::fmt;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use log::warn;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, Take};

const MESSAGE_TEMPLATE_HEAD: &str = r#"<!DOCTYPE html><html><head><meta charset="utf-8"></head><body>"#;
const MESSAGE_TEMPLATE_TAIL: &str = "</body></html>";

const FILE_CHUNK_SIZE: usize = 16 * 1024;

/// What a denied request gets back. Defaults to a bare 403.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Action {
    #[default]
    Forbidden,
    Message(String),
    Redirect(String),
    ServeFile(PathBuf),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Forbidden => "forbidden",
            Action::Message(_) => "message",
            Action::Redirect(_) => "redirect",
            Action::ServeFile(_) => "file",
        }
    }
}

/// A response written by the proxy without going upstream.
#[derive(Debug, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Body,
}

impl Reply {
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Body::Full(Bytes::new()),
        }
    }

    pub fn bad_request() -> Self {
        Self::empty(400)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Reply payload: rendered in memory, or an opened file sent in chunks.
#[derive(Debug)]
pub enum Body {
    Full(Bytes),
    File(FileBody),
}

impl Body {
    pub fn len(&self) -> u64 {
        match self {
            Body::Full(bytes) => bytes.len() as u64,
            Body::File(file) => file.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Files are never equal: each one is a distinct open handle.
impl PartialEq for Body {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Body::Full(a), Body::Full(b)) => a == b,
            _ => false,
        }
    }
}

/// An open page file, read no further than the length it had when opened.
pub struct FileBody {
    reader: Take<File>,
    len: u64,
}

impl FileBody {
    async fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path).await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            reader: file.take(len),
            len,
        })
    }

    /// Next chunk of the file, `None` once it is exhausted.
    pub async fn next_chunk(&mut self) -> io::Result<Option<Bytes>> {
        let mut buf = BytesMut::with_capacity(FILE_CHUNK_SIZE);
        let read = self.reader.read_buf(&mut buf).await?;
        Ok((read > 0).then(|| buf.freeze()))
    }
}

impl fmt::Debug for FileBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBody").field("len", &self.len).finish()
    }
}

/// Produces the configured denial response. Exactly one action runs per call.
#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    action: Action,
    rendered_message: Bytes,
}

impl ActionDispatcher {
    pub fn new(action: Action) -> Self {
        let rendered_message = match &action {
            Action::Message(text) => render_message(text),
            _ => Bytes::new(),
        };
        Self {
            action,
            rendered_message,
        }
    }

    pub async fn respond(&self) -> Reply {
        match &self.action {
            Action::Forbidden => Reply::empty(403),
            Action::Message(_) => Reply {
                status: 200,
                headers: vec![("Content-Type", "text/html; charset=utf-8".to_string())],
                body: Body::Full(self.rendered_message.clone()),
            },
            Action::Redirect(url) => Reply {
                status: 307,
                headers: vec![("Location", url.clone())],
                body: Body::Full(Bytes::new()),
            },
            Action::ServeFile(path) => serve_file(path).await,
        }
    }
}

fn render_message(text: &str) -> Bytes {
    Bytes::from(format!("{MESSAGE_TEMPLATE_HEAD}{text}{MESSAGE_TEMPLATE_TAIL}"))
}

// Opened on every call so edits to the file show up without a restart.
async fn serve_file(path: &Path) -> Reply {
    match FileBody::open(path).await {
        Ok(file) => Reply {
            status: 200,
            headers: vec![("Content-Type", content_type(path).to_string())],
            body: Body::File(file),
        },
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("denial page '{}' does not exist", path.display());
            Reply::empty(404)
        }
        Err(e) => {
            warn!("failed to read denial page '{}': {}", path.display(), e);
            Reply::empty(500)
        }
    }
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("txt") => "text/plain; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}
