use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use candl_core::{SearchCandidate, SymbolSearch};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Suggestions for one settled query.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestions {
    pub query: String,
    pub candidates: Vec<SearchCandidate>,
}

/// Collapses a burst of query edits into one search for the latest text,
/// issued only after `quiet` elapses with no further edits.
pub struct SuggestionDebouncer {
    search: Arc<dyn SymbolSearch>,
    quiet: Duration,
    seq: Arc<AtomicU64>,
    pending: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<Suggestions>,
}

impl SuggestionDebouncer {
    pub fn new(search: Arc<dyn SymbolSearch>, quiet: Duration) -> (Self, mpsc::UnboundedReceiver<Suggestions>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let debouncer = Self {
            search,
            quiet,
            seq: Arc::new(AtomicU64::new(0)),
            pending: None,
            tx,
        };
        (debouncer, rx)
    }

    pub fn on_query_change(&mut self, text: &str) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.abort_pending();

        let query = text.trim().to_string();
        if query.is_empty() {
            let _ = self.tx.send(Suggestions {
                query,
                candidates: Vec::new(),
            });
            return;
        }

        let search = self.search.clone();
        let latest = self.seq.clone();
        let tx = self.tx.clone();
        let quiet = self.quiet;

        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(quiet).await;

            let candidates = match search.search(&query).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    tracing::warn!("Symbol search for '{}' failed: {}", query, e);
                    Vec::new()
                }
            };

            // A newer edit arrived while the search was in flight.
            if latest.load(Ordering::SeqCst) != seq {
                return;
            }
            let _ = tx.send(Suggestions { query, candidates });
        }));
    }

    /// Drop any pending timer without emitting.
    pub fn cancel(&mut self) {
        self.seq.fetch_add(1, Ordering::SeqCst);
        self.abort_pending();
    }

    fn abort_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl Drop for SuggestionDebouncer {
    fn drop(&mut self) {
        self.abort_pending();
    }
}
