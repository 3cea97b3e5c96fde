//! Filesystem watcher that triggers debounced rescans.
//!
//! Events under the scan root are collapsed by a [`Debouncer`]: a rescan runs
//! once the tree has been quiet for the debounce interval, and never sooner
//! than one interval after the previous rescan.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::hashtree::ScanOptions;
use crate::rescan::Rescanner;

/// Trailing-edge debounce state.
#[derive(Debug, Clone)]
pub struct Debouncer {
    interval: Duration,
    last_event: Option<Instant>,
    last_run: Option<Instant>,
}

impl Debouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_event: None,
            last_run: None,
        }
    }

    /// Record a trigger.
    pub fn trigger(&mut self, now: Instant) {
        self.last_event = Some(now);
    }

    pub fn pending(&self) -> bool {
        self.last_event.is_some()
    }

    /// When the pending rescan may run, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        let quiet = self.last_event? + self.interval;
        Some(match self.last_run {
            Some(run) => quiet.max(run + self.interval),
            None => quiet,
        })
    }

    pub fn ready(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|d| now >= d)
    }

    /// Record that a rescan ran at `now`, clearing pending triggers.
    pub fn mark_run(&mut self, now: Instant) {
        self.last_event = None;
        self.last_run = Some(now);
    }
}

/// Whether an event path can affect the snapshot.
fn relevant(root: &Path, path: &Path, options: &ScanOptions) -> bool {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative.components().all(|c| match c {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            !name.starts_with('.') && !options.ignore_dirs.iter().any(|d| *d == name)
        }
        _ => true,
    })
}

/// Watch `root` and run `rescanner.rescan()` after bursts of changes, until
/// `shutdown` turns true.
pub fn spawn_watcher(
    root: impl Into<PathBuf>,
    options: ScanOptions,
    rescanner: Arc<Rescanner>,
    debounce: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>, notify::Error> {
    let root = root.into();
    let (tx, mut rx) = mpsc::channel::<()>(256);

    let filter_root = root.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    return;
                }
                if event
                    .paths
                    .iter()
                    .any(|p| relevant(&filter_root, p, &options))
                {
                    // A full channel already holds a pending trigger.
                    let _ = tx.try_send(());
                }
            }
            Err(e) => warn!(error = %e, "File watcher notify error"),
        },
        Config::default(),
    )?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    info!(root = %root.display(), debounce_ms = debounce.as_millis() as u64, "Watching for changes");

    Ok(tokio::spawn(async move {
        // Keep the watcher alive for the lifetime of the loop.
        let _watcher = watcher;
        let mut debouncer = Debouncer::new(debounce);

        loop {
            let deadline = debouncer.deadline();
            tokio::select! {
                event = rx.recv() => match event {
                    Some(()) => {
                        debug!("Change detected");
                        debouncer.trigger(Instant::now());
                    }
                    None => break,
                },
                _ = sleep_until(deadline) => {
                    let report = rescanner.rescan().await;
                    debouncer.mark_run(Instant::now());
                    debug!(changed = report.changes.len(), "Debounced rescan finished");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(root = %root.display(), "File watcher stopped");
    }))
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_collapses_to_one_deadline() {
        let start = Instant::now();
        let interval = Duration::from_millis(500);
        let mut debouncer = Debouncer::new(interval);
        assert!(debouncer.deadline().is_none());

        debouncer.trigger(start);
        debouncer.trigger(start + Duration::from_millis(100));
        debouncer.trigger(start + Duration::from_millis(200));
        assert_eq!(
            debouncer.deadline(),
            Some(start + Duration::from_millis(700))
        );
        assert!(!debouncer.ready(start + Duration::from_millis(600)));
        assert!(debouncer.ready(start + Duration::from_millis(700)));
    }

    #[test]
    fn test_minimum_interval_between_runs() {
        let start = Instant::now();
        let interval = Duration::from_millis(500);
        let mut debouncer = Debouncer::new(interval);

        debouncer.mark_run(start);
        assert!(!debouncer.pending());
        debouncer.trigger(start);
        assert_eq!(debouncer.deadline(), Some(start + interval));

        debouncer.mark_run(start + interval);
        debouncer.trigger(start + interval + Duration::from_millis(10));
        assert!(!debouncer.ready(start + interval + Duration::from_millis(400)));
        assert!(debouncer.ready(start + interval + Duration::from_millis(510)));
    }

    #[test]
    fn test_relevant_paths() {
        let root = Path::new("/tools");
        let options = ScanOptions::default();
        assert!(relevant(root, Path::new("/tools/api/weather.py"), &options));
        assert!(!relevant(root, Path::new("/tools/.git/index"), &options));
        assert!(!relevant(root, Path::new("/tools/pkg/__pycache__/x.pyc"), &options));
    }
}
