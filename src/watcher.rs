//! Hot reload of the geolocation database.
//!
//! [`DatabaseWatcher::subscribe`] returns only once the directory watch is
//! attached, so a caller enabling auto-reload knows it is live. The event loop
//! itself runs later, as a Pingora background service ([`ReloadService`]).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use pingora::server::ShutdownWatch;
use pingora::services::background::BackgroundService;
use tokio::sync::mpsc;

use crate::error::WatchError;
use crate::geo::{DatabaseOpener, GeoResolver};

pub struct DatabaseWatcher {
    reloader: Reloader,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    watcher: RecommendedWatcher,
}

impl DatabaseWatcher {
    /// Starts watching the directory that contains `db_path`.
    pub fn subscribe(
        db_path: &Path,
        resolver: Arc<GeoResolver>,
        opener: Arc<dyn DatabaseOpener>,
    ) -> Result<Self, WatchError> {
        let dir = watch_dir(db_path)?;
        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!("watching {} for Geo DB changes", dir.display());

        Ok(Self {
            reloader: Reloader {
                db_path: db_path.to_path_buf(),
                resolver,
                opener,
            },
            events,
            watcher,
        })
    }

    /// Processes file events until the subscription fails or closes. After
    /// that the last loaded database stays active for good.
    pub async fn run(self) {
        let DatabaseWatcher {
            reloader,
            mut events,
            watcher,
        } = self;

        while let Some(event) = events.recv().await {
            match event {
                Ok(event) => {
                    if is_write_or_create(&event.kind)
                        && event.paths.iter().any(|p| reloader.targets_database(p))
                    {
                        debug!("Geo DB change detected: {:?}", event.kind);
                        reloader.reload().await;
                    }
                }
                Err(e) => {
                    error!(
                        "file watcher has failed, Geo DB will not be reloaded automatically: {}",
                        e
                    );
                    return;
                }
            }
        }
        drop(watcher);
        warn!("file watcher has stopped, Geo DB will not be reloaded automatically");
    }
}

struct Reloader {
    db_path: PathBuf,
    resolver: Arc<GeoResolver>,
    opener: Arc<dyn DatabaseOpener>,
}

impl Reloader {
    // Resolved on every event: the configured path may be a symlink that was
    // just retargeted.
    fn targets_database(&self, event_path: &Path) -> bool {
        let Ok(database) = std::fs::canonicalize(&self.db_path) else {
            return false;
        };
        std::fs::canonicalize(event_path)
            .map(|path| path == database)
            .unwrap_or(false)
    }

    /// Opens the new handle first; the resolver only sees it once it is valid.
    async fn reload(&self) {
        let opener = self.opener.clone();
        let path = self.db_path.clone();
        let database = match tokio::task::spawn_blocking(move || opener.open(&path)).await {
            Ok(Ok(database)) => database,
            Ok(Err(e)) => {
                error!("failed to reload Geo DB: {}", e);
                return;
            }
            Err(e) => {
                error!("failed to reload Geo DB: {}", e);
                return;
            }
        };

        if let Err(e) = self.resolver.swap(database) {
            error!("{}", e);
        }
        info!("Geo DB is reloaded, generation={}", self.resolver.generation());
    }
}

fn watch_dir(db_path: &Path) -> Result<PathBuf, WatchError> {
    let dir = match db_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::canonicalize(dir).map_err(|source| WatchError::Directory {
        path: dir.to_path_buf(),
        source,
    })
}

fn is_write_or_create(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both))
    )
}

/// Drives a [`DatabaseWatcher`] inside the Pingora server until shutdown.
pub struct ReloadService {
    watcher: Mutex<Option<DatabaseWatcher>>,
}

impl ReloadService {
    pub fn new(watcher: DatabaseWatcher) -> Self {
        Self {
            watcher: Mutex::new(Some(watcher)),
        }
    }
}

#[async_trait]
impl BackgroundService for ReloadService {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(watcher) = watcher else {
            return;
        };

        tokio::select! {
            _ = watcher.run() => {}
            _ = shutdown.changed() => {
                info!("Geo DB watcher is shutting down");
            }
        }
    }
}
