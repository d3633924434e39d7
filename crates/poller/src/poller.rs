use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use filedock_gateway::{GatewayError, StorageGateway};
use filedock_notify::EventHub;
use filedock_protocol::events::{DirectoryChanged, Event};
use filedock_protocol::types::DirectoryListing;

use crate::fingerprint::fingerprint;

/// Source of remote directory listings.
///
/// Implemented for [`StorageGateway`]; tests substitute a scripted source.
pub trait RemoteSource: Send + Sync {
    fn list<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<DirectoryListing, GatewayError>> + Send + 'a>>;
}

impl RemoteSource for StorageGateway {
    fn list<'a>(
        &'a self,
        path: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<DirectoryListing, GatewayError>> + Send + 'a>> {
        Box::pin(StorageGateway::list(self, path))
    }
}

/// Poller tuning.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Root paths polled every tick.
    pub roots: Vec<String>,
    /// Tick interval.
    pub interval: Duration,
    /// Maximum recursion depth below a root. Exceeding it is a logged
    /// truncation, never silent unbounded growth.
    pub max_depth: usize,
    /// At most this many child directories are entered per level.
    pub max_dirs_per_level: usize,
    /// Delay between recursive child polls, to avoid request bursts.
    pub stagger: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            interval: Duration::from_secs(3),
            max_depth: 4,
            max_dirs_per_level: 5,
            stagger: Duration::from_millis(150),
        }
    }
}

struct DirectorySnapshot {
    fingerprint: String,
    last_polled_at: Instant,
}

/// Detects remote directory changes by comparing listing fingerprints
/// between ticks and broadcasts `directory_changed` for every difference.
pub struct ChangePoller {
    source: Arc<dyn RemoteSource>,
    hub: Arc<EventHub>,
    config: PollerConfig,
    /// One snapshot per distinct remote path; last-known-good is retained
    /// across transient poll failures.
    snapshots: RwLock<HashMap<String, DirectorySnapshot>>,
}

impl ChangePoller {
    pub fn new(source: Arc<dyn RemoteSource>, hub: Arc<EventHub>, config: PollerConfig) -> Self {
        Self {
            source,
            hub,
            config,
            snapshots: RwLock::new(HashMap::new()),
        }
    }

    /// Ticks until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            roots = ?self.config.roots,
            interval = ?self.config.interval,
            "change poller started"
        );
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("change poller stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// Polls every configured root once.
    ///
    /// A failing root is logged and skipped; its siblings still poll and
    /// its stored snapshot is left untouched.
    pub async fn tick(&self) {
        for root in self.config.roots.clone() {
            self.poll_dir(root, 0).await;
        }
    }

    fn poll_dir<'a>(
        &'a self,
        path: String,
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let listing = match self.source.list(&path).await {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(path = %path, "poll failed, keeping last snapshot: {e}");
                    return;
                }
            };

            let fp = fingerprint(&listing);
            let changed = {
                let mut snaps = self.snapshots.write().unwrap();
                let changed = snaps.get(&path).is_some_and(|s| s.fingerprint != fp);
                snaps.insert(
                    path.clone(),
                    DirectorySnapshot {
                        fingerprint: fp,
                        last_polled_at: Instant::now(),
                    },
                );

                // The listing is authoritative: snapshots under children
                // that vanished from the live tree are evicted.
                let prefix = format!("{}/", path.trim_end_matches('/'));
                snaps.retain(|key, _| match key.strip_prefix(&prefix) {
                    Some(rest) => {
                        let first = rest.split('/').next().unwrap_or(rest);
                        listing.directories.iter().any(|d| d == first)
                    }
                    None => true,
                });
                changed
            };

            if changed {
                info!(path = %path, "remote directory changed");
                self.hub.broadcast(&Event::DirectoryChanged(DirectoryChanged {
                    path: path.clone(),
                    listing: listing.clone(),
                }));
            }

            if depth >= self.config.max_depth {
                if !listing.directories.is_empty() {
                    warn!(path = %path, depth, "max poll depth reached, not descending");
                }
                return;
            }
            if listing.directories.len() > self.config.max_dirs_per_level {
                debug!(
                    path = %path,
                    children = listing.directories.len(),
                    limit = self.config.max_dirs_per_level,
                    "truncating child fan-out"
                );
            }

            for child in listing.directories.iter().take(self.config.max_dirs_per_level) {
                if !self.config.stagger.is_zero() {
                    tokio::time::sleep(self.config.stagger).await;
                }
                self.poll_dir(join_path(&path, child), depth + 1).await;
            }
        })
    }

    /// Number of paths currently snapshotted.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.read().unwrap().len()
    }

    /// When `path` was last successfully polled.
    pub fn last_polled_at(&self, path: &str) -> Option<Instant> {
        self.snapshots
            .read()
            .unwrap()
            .get(path)
            .map(|s| s.last_polled_at)
    }
}

fn join_path(parent: &str, child: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    use filedock_protocol::events::EventEnvelope;
    use filedock_protocol::types::RemoteEntry;

    /// Scripted remote: per-path listing or outage, swappable between ticks.
    struct ScriptedSource {
        listings: Mutex<HashMap<String, Result<DirectoryListing, String>>>,
    }

    impl ScriptedSource {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                listings: Mutex::new(HashMap::new()),
            })
        }

        fn set(&self, path: &str, listing: DirectoryListing) {
            self.listings
                .lock()
                .unwrap()
                .insert(path.into(), Ok(listing));
        }

        fn fail(&self, path: &str) {
            self.listings
                .lock()
                .unwrap()
                .insert(path.into(), Err("scripted outage".into()));
        }
    }

    impl RemoteSource for ScriptedSource {
        fn list<'a>(
            &'a self,
            path: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<DirectoryListing, GatewayError>> + Send + 'a>>
        {
            Box::pin(async move {
                match self.listings.lock().unwrap().get(path) {
                    Some(Ok(listing)) => Ok(listing.clone()),
                    Some(Err(msg)) => Err(GatewayError::Unreachable(msg.clone())),
                    None => Err(GatewayError::NotFound(path.to_string())),
                }
            })
        }
    }

    fn subscribed_hub() -> (Arc<EventHub>, mpsc::Receiver<EventEnvelope>) {
        let hub = Arc::new(EventHub::new());
        let (tx, rx) = mpsc::channel(64);
        hub.register(tx);
        (hub, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<EventEnvelope>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            events.push(envelope.event);
        }
        events
    }

    fn files(entries: &[(&str, i64)]) -> DirectoryListing {
        DirectoryListing {
            files: entries
                .iter()
                .map(|(name, size)| RemoteEntry {
                    name: (*name).into(),
                    size: *size,
                    mtime: 0,
                })
                .collect(),
            directories: vec![],
        }
    }

    fn config(roots: &[&str]) -> PollerConfig {
        PollerConfig {
            roots: roots.iter().map(|r| (*r).to_string()).collect(),
            stagger: Duration::ZERO,
            ..PollerConfig::default()
        }
    }

    #[tokio::test]
    async fn first_poll_never_fires() {
        let source = ScriptedSource::new();
        source.set("/p", files(&[("f1", 10)]));
        let (hub, mut rx) = subscribed_hub();
        let poller = ChangePoller::new(source, hub, config(&["/p"]));

        poller.tick().await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(poller.snapshot_count(), 1);
    }

    #[tokio::test]
    async fn unchanged_second_tick_fires_nothing() {
        let source = ScriptedSource::new();
        source.set("/p", files(&[("f1", 10)]));
        let (hub, mut rx) = subscribed_hub();
        let poller = ChangePoller::new(source, hub, config(&["/p"]));

        poller.tick().await;
        poller.tick().await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn size_change_fires_exactly_one_event() {
        let source = ScriptedSource::new();
        source.set("/p", files(&[("f1", 10)]));
        let (hub, mut rx) = subscribed_hub();
        let poller = ChangePoller::new(Arc::clone(&source) as _, hub, config(&["/p"]));

        poller.tick().await;
        source.set("/p", files(&[("f1", 20)]));
        poller.tick().await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::DirectoryChanged(changed) => {
                assert_eq!(changed.path, "/p");
                assert_eq!(changed.listing.files[0].size, 20);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn transient_failure_keeps_last_known_good() {
        let source = ScriptedSource::new();
        source.set("/p", files(&[("f1", 10)]));
        let (hub, mut rx) = subscribed_hub();
        let poller = ChangePoller::new(Arc::clone(&source) as _, hub, config(&["/p"]));

        poller.tick().await;
        let polled_before = poller.last_polled_at("/p").unwrap();

        source.fail("/p");
        poller.tick().await;
        assert!(drain(&mut rx).is_empty());
        // Snapshot untouched by the failed poll.
        assert_eq!(poller.last_polled_at("/p").unwrap(), polled_before);

        // Remote comes back with identical content: still no event.
        source.set("/p", files(&[("f1", 10)]));
        poller.tick().await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn failing_root_does_not_abort_siblings() {
        let source = ScriptedSource::new();
        source.fail("/a");
        source.set("/b", files(&[("f", 1)]));
        let (hub, mut rx) = subscribed_hub();
        let poller = ChangePoller::new(Arc::clone(&source) as _, hub, config(&["/a", "/b"]));

        poller.tick().await;
        source.set("/b", files(&[("f", 2)]));
        poller.tick().await;

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], Event::DirectoryChanged(c) if c.path == "/b"));
    }

    #[tokio::test]
    async fn child_fan_out_is_bounded() {
        let source = ScriptedSource::new();
        let children: Vec<String> = (0..8).map(|i| format!("d{i}")).collect();
        source.set(
            "/root",
            DirectoryListing {
                files: vec![],
                directories: children.clone(),
            },
        );
        for child in &children {
            source.set(&format!("/root/{child}"), files(&[]));
        }
        let (hub, _rx) = subscribed_hub();
        let poller = ChangePoller::new(source, hub, config(&["/root"]));

        poller.tick().await;
        // Root plus the first five children only.
        assert_eq!(poller.snapshot_count(), 6);
        assert!(poller.last_polled_at("/root/d4").is_some());
        assert!(poller.last_polled_at("/root/d5").is_none());
    }

    #[tokio::test]
    async fn recursion_depth_is_capped() {
        let source = ScriptedSource::new();
        source.set(
            "/root",
            DirectoryListing {
                files: vec![],
                directories: vec!["a".into()],
            },
        );
        source.set(
            "/root/a",
            DirectoryListing {
                files: vec![],
                directories: vec!["b".into()],
            },
        );
        source.set("/root/a/b", files(&[]));

        let (hub, _rx) = subscribed_hub();
        let mut cfg = config(&["/root"]);
        cfg.max_depth = 1;
        let poller = ChangePoller::new(source, hub, cfg);

        poller.tick().await;
        assert!(poller.last_polled_at("/root/a").is_some());
        // Depth cap stops before /root/a/b.
        assert!(poller.last_polled_at("/root/a/b").is_none());
    }

    #[tokio::test]
    async fn vanished_child_snapshot_is_evicted() {
        let source = ScriptedSource::new();
        source.set(
            "/root",
            DirectoryListing {
                files: vec![],
                directories: vec!["sub".into()],
            },
        );
        source.set("/root/sub", files(&[("f", 1)]));
        let (hub, mut rx) = subscribed_hub();
        let poller = ChangePoller::new(Arc::clone(&source) as _, hub, config(&["/root"]));

        poller.tick().await;
        assert!(poller.last_polled_at("/root/sub").is_some());

        // The subdirectory disappears from the live tree.
        source.set("/root", files(&[]));
        poller.tick().await;

        assert!(poller.last_polled_at("/root/sub").is_none());
        // The root itself changed (lost a child), which is reported.
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn run_loop_broadcasts_until_cancelled() {
        let source = ScriptedSource::new();
        source.set("/p", files(&[("f1", 10)]));
        let (hub, mut rx) = subscribed_hub();

        let mut cfg = config(&["/p"]);
        cfg.interval = Duration::from_millis(20);
        let poller = Arc::new(ChangePoller::new(Arc::clone(&source) as _, hub, cfg));

        let cancel = CancellationToken::new();
        let task = {
            let poller = Arc::clone(&poller);
            let cancel = cancel.clone();
            tokio::spawn(async move { poller.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        source.set("/p", files(&[("f1", 99)]));
        tokio::time::sleep(Duration::from_millis(80)).await;

        cancel.cancel();
        task.await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1, "one change, one event");
    }
}
