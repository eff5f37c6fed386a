//! Client-side orchestration for per-symbol market snapshots.
//!
//! [`RequestCoordinator`] is the entry point: it tags every analysis with a
//! generation, fans out to the [`SourceFetchers`], folds the results through
//! the [`Aggregator`], and commits only the newest generation. Retry and
//! refresh timers re-enter the coordinator; they never write state directly.

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod debounce;
pub mod dedupe;
pub mod fetchers;
pub mod refresh;
pub mod retry;
pub mod state;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::{consensus_label, risk_meter, Aggregator};
pub use cache::{CacheEntry, SnapshotCache};
pub use config::OrchestratorConfig;
pub use coordinator::{AnalysisOutcome, Collaborators, CoordinatorEvent, RequestCoordinator, Trigger};
pub use debounce::{SuggestionDebouncer, Suggestions};
pub use dedupe::{dedupe, normalize};
pub use fetchers::{FacetOutcomes, FetchOutcome, SettledFacets, SourceFetchers};
pub use refresh::RefreshScheduler;
pub use retry::{RetryDecision, RetryPolicy, RetryScheduler, RetryState};
pub use state::{AppState, Theme};
pub use store::{LocalStore, StoreError};
