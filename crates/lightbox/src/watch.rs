//! Poll-based stand-in for the object store's change notifications.
//!
//! Artifacts present when the watcher starts are treated as already seen and
//! left to the reconciliation sweeps. Every path that appears afterwards is
//! delivered once as an [`InboxNotification`]. Paths that disappear from the
//! listing are forgotten, so a later upload to the same path is delivered again.

use crate::pipeline::Pipeline;
use crate::store::StoreResult;
use lightbox_protocol::InboxNotification;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub struct LocalWatcher {
    pipeline: Arc<Pipeline>,
    prefixes: Vec<String>,
    poll_interval: Duration,
    seen: HashSet<String>,
}

impl LocalWatcher {
    /// Watches the pipeline's inbox and processed prefixes.
    pub fn new(pipeline: Arc<Pipeline>, poll_interval: Duration) -> Self {
        let namespaces = pipeline.namespaces();
        let prefixes = vec![namespaces.inbox.clone(), namespaces.processed.clone()];
        Self {
            pipeline,
            prefixes,
            poll_interval,
            seen: HashSet::new(),
        }
    }

    async fn list_all(&self) -> StoreResult<Vec<InboxNotification>> {
        let mut found = Vec::new();
        for prefix in &self.prefixes {
            for summary in self.pipeline.store().list(prefix).await? {
                found.push(InboxNotification::from(&summary));
            }
        }
        Ok(found)
    }

    /// Mark everything currently stored as seen. Returns how many paths that was.
    pub async fn prime(&mut self) -> StoreResult<usize> {
        let existing = self.list_all().await?;
        let count = existing.len();
        self.seen.extend(existing.into_iter().map(|n| n.path));
        info!(existing = count, "Watcher primed; existing artifacts left to sweeps");
        Ok(count)
    }

    /// Number of paths currently remembered as seen.
    pub fn tracked(&self) -> usize {
        self.seen.len()
    }

    /// Deliver notifications for paths not seen before. Returns the delivered paths.
    pub async fn poll_once(&mut self) -> StoreResult<Vec<String>> {
        let listed = self.list_all().await?;
        let present: HashSet<&str> = listed.iter().map(|n| n.path.as_str()).collect();
        self.seen.retain(|path| present.contains(path.as_str()));

        let mut delivered = Vec::new();
        for notification in listed {
            if !self.seen.insert(notification.path.clone()) {
                continue;
            }
            debug!(path = %notification.path, "New artifact detected");
            // Outcomes and failures are logged by the pipeline.
            let _ = self.pipeline.handle_notification(&notification).await;
            delivered.push(notification.path);
        }
        Ok(delivered)
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.prime().await {
            warn!(error = %e, "Initial watcher scan failed; every artifact will look new");
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately, skip it
        ticker.tick().await;

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "Watcher poll failed");
                    }
                }
            }
        }

        info!("Watcher stopped");
    }
}
