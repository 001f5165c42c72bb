//! Inflight Coalescer (C3): deduplicates concurrent probes of the same URL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::{Error, ErrorKind};
use crate::probe::ProbeResult;

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(18);
const TWITTER_WAIT_TIMEOUT: Duration = Duration::from_secs(40);
const CLEANUP_DELAY: Duration = Duration::from_secs(3);

#[derive(Clone)]
enum Outcome {
    Ok(Arc<ProbeResult>),
    Err(Arc<Error>),
}

struct Entry {
    stage: Mutex<String>,
    tx: broadcast::Sender<Outcome>,
    waiter_count: std::sync::atomic::AtomicUsize,
}

/// Outcome of waiting on (or leading) an inflight probe.
pub enum WaitOutcome {
    /// This caller is the leader: no one else is probing this URL yet.
    Lead,
    /// The leader's result arrived before our timeout.
    Coalesced(Result<Arc<ProbeResult>, Arc<Error>>),
    /// Our wait timed out while the leader was still working.
    InProgress { stage: String, retry_after_secs: u64 },
}

/// Thread-safe map of in-flight probes keyed by URL.
#[derive(Default)]
pub struct InflightCoalescer {
    entries: Mutex<HashMap<String, Arc<Entry>>>,
}

impl InflightCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join (or become the leader of) the inflight probe for `url`.
    pub fn join(&self, url: &str, is_twitter: bool) -> WaitOutcomeHandle {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get(url) {
            entry
                .waiter_count
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            let rx = entry.tx.subscribe();
            let stage = entry.stage.lock().clone();
            let timeout = if is_twitter {
                TWITTER_WAIT_TIMEOUT
            } else {
                DEFAULT_WAIT_TIMEOUT
            };
            return WaitOutcomeHandle::Follower { rx, stage, timeout };
        }

        let (tx, _rx) = broadcast::channel(1);
        let entry = Arc::new(Entry {
            stage: Mutex::new("probing".to_string()),
            tx,
            waiter_count: std::sync::atomic::AtomicUsize::new(1),
        });
        entries.insert(url.to_string(), entry.clone());
        WaitOutcomeHandle::Leader {
            url: url.to_string(),
            entry,
        }
    }

    fn publish_and_schedule_cleanup(self: &Arc<Self>, url: String, outcome: Outcome) {
        let entries = self.entries.lock();
        if let Some(entry) = entries.get(&url) {
            let _ = entry.tx.send(outcome);
        }
        drop(entries);

        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(CLEANUP_DELAY).await;
            this.entries.lock().remove(&url);
        });
    }
}

/// A handle returned by [`InflightCoalescer::join`].
pub enum WaitOutcomeHandle {
    Leader {
        url: String,
        entry: Arc<Entry>,
    },
    Follower {
        rx: broadcast::Receiver<Outcome>,
        stage: String,
        timeout: Duration,
    },
}

impl WaitOutcomeHandle {
    /// Update the current probe stage label (leader only, no-op for followers).
    pub fn set_stage(&self, stage: impl Into<String>) {
        if let Self::Leader { entry, .. } = self {
            *entry.stage.lock() = stage.into();
        }
    }

    /// Leader: publish the final result and schedule cleanup. No-op for followers.
    pub fn complete(
        &self,
        coalescer: &Arc<InflightCoalescer>,
        result: std::result::Result<ProbeResult, Error>,
    ) {
        if let Self::Leader { url, .. } = self {
            let outcome = match result {
                Ok(r) => Outcome::Ok(Arc::new(r)),
                Err(e) => Outcome::Err(Arc::new(e)),
            };
            coalescer.publish_and_schedule_cleanup(url.clone(), outcome);
        }
    }

    /// Follower: wait for the leader's result or our own timeout.
    pub async fn wait(self) -> WaitOutcome {
        match self {
            Self::Leader { .. } => WaitOutcome::Lead,
            Self::Follower {
                mut rx,
                stage,
                timeout,
            } => match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Ok(Outcome::Ok(r))) => WaitOutcome::Coalesced(Ok(r)),
                Ok(Ok(Outcome::Err(e))) => WaitOutcome::Coalesced(Err(e)),
                Ok(Err(_)) => WaitOutcome::InProgress {
                    stage,
                    retry_after_secs: timeout.as_secs(),
                },
                Err(_) => WaitOutcome::InProgress {
                    stage,
                    retry_after_secs: timeout.as_secs(),
                },
            },
        }
    }
}

impl From<Arc<Error>> for Error {
    fn from(e: Arc<Error>) -> Self {
        Error::probe(e.kind(), e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_caller_leads_second_is_coalesced() {
        let coalescer = Arc::new(InflightCoalescer::new());

        let leader = coalescer.join("https://example.com/x", false);
        assert!(matches!(leader, WaitOutcomeHandle::Leader { .. }));

        let follower = coalescer.join("https://example.com/x", false);
        assert!(matches!(follower, WaitOutcomeHandle::Follower { .. }));

        let result = ProbeResult {
            title: "t".into(),
            id: "1".into(),
            uploader: None,
            duration: None,
            thumbnail: None,
            formats: vec![],
            subtitles: vec![],
            auto_subtitles: vec![],
            capabilities: Default::default(),
            quality_pairs: Default::default(),
        };
        leader.complete(&coalescer, Ok(result));

        match follower.wait().await {
            WaitOutcome::Coalesced(Ok(r)) => assert_eq!(r.title, "t"),
            _ => panic!("expected coalesced success"),
        }
    }

    #[tokio::test]
    async fn follower_times_out_with_in_progress_stage() {
        let coalescer = Arc::new(InflightCoalescer::new());
        let _leader = coalescer.join("https://example.com/y", false);

        // Construct a follower directly with a tiny timeout to avoid a slow test.
        let entries = coalescer.entries.lock();
        let entry = entries.get("https://example.com/y").unwrap().clone();
        drop(entries);
        let follower = WaitOutcomeHandle::Follower {
            rx: entry.tx.subscribe(),
            stage: "probing".to_string(),
            timeout: Duration::from_millis(20),
        };

        match follower.wait().await {
            WaitOutcome::InProgress { stage, retry_after_secs } => {
                assert_eq!(stage, "probing");
                assert_eq!(retry_after_secs, 0);
            }
            _ => panic!("expected in-progress timeout"),
        }
    }
}
