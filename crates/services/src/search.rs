//! Search-style lookups where a newer request supersedes a pending one.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{LookupError, ProviderError};
use crate::provider::{AssessmentDirectory, AssessmentSummary};

/// Runs at most one lookup at a time; starting a new one cancels the last.
#[derive(Debug, Default)]
pub struct SupersedingLookup {
    current: Mutex<Option<(u64, CancellationToken)>>,
    generation: AtomicU64,
}

impl SupersedingLookup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel whatever lookup is pending without starting a new one.
    pub fn cancel_pending(&self) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((_, token)) = current.take() {
            token.cancel();
        }
    }

    /// Run `lookup`, cancelling any lookup started earlier through `self`.
    ///
    /// # Errors
    ///
    /// Returns `LookupError::Superseded` if a newer lookup starts before this
    /// one resolves, or the lookup's own error.
    pub async fn run<T, F>(&self, lookup: F) -> Result<T, LookupError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((previous, stale)) = current.replace((generation, token.clone())) {
                debug!(superseded = previous, by = generation, "cancelling pending lookup");
                stale.cancel();
            }
        }

        let result = tokio::select! {
            biased;
            () = token.cancelled() => Err(LookupError::Superseded),
            outcome = lookup => outcome.map_err(LookupError::from),
        };

        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref().is_some_and(|(g, _)| *g == generation) {
            *current = None;
        }
        result
    }
}

/// Assessment search with cancel-on-supersede.
#[derive(Clone)]
pub struct SearchService {
    directory: Arc<dyn AssessmentDirectory>,
    lookup: Arc<SupersedingLookup>,
}

impl SearchService {
    #[must_use]
    pub fn new(directory: Arc<dyn AssessmentDirectory>) -> Self {
        Self {
            directory,
            lookup: Arc::new(SupersedingLookup::new()),
        }
    }

    /// Search assessments. A blank query returns nothing and cancels any
    /// pending search.
    ///
    /// # Errors
    ///
    /// Returns `LookupError::Superseded` if another search started meanwhile,
    /// or `LookupError::Provider` if the directory fails.
    pub async fn search(&self, query: &str) -> Result<Vec<AssessmentSummary>, LookupError> {
        let query = query.trim();
        if query.is_empty() {
            self.lookup.cancel_pending();
            return Ok(Vec::new());
        }
        self.lookup.run(self.directory.search(query)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn newer_lookup_supersedes_pending_one() {
        let lookup = Arc::new(SupersedingLookup::new());
        let started = Arc::new(Notify::new());

        let first = {
            let lookup = Arc::clone(&lookup);
            let started = Arc::clone(&started);
            tokio::spawn(async move {
                lookup
                    .run(async move {
                        started.notify_one();
                        std::future::pending::<Result<u32, ProviderError>>().await
                    })
                    .await
            })
        };
        started.notified().await;

        let second = lookup.run(async { Ok::<_, ProviderError>(7) }).await;
        assert_eq!(second.unwrap(), 7);
        assert!(matches!(first.await.unwrap(), Err(LookupError::Superseded)));
    }

    #[tokio::test]
    async fn provider_errors_pass_through() {
        let lookup = SupersedingLookup::new();
        let err = lookup
            .run(async { Err::<u32, _>(ProviderError::Unavailable("down".into())) })
            .await
            .unwrap_err();
        assert!(matches!(err, LookupError::Provider(ProviderError::Unavailable(_))));
    }
}
