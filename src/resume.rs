//! Resume decisions
//!
//! Reads the checkpoint left by a previous run and decides whether this run
//! continues it or starts with fresh discovery.

use std::sync::Arc;

use crate::{
    error::Result,
    logging::ScanLogger,
    persistence::{ScanState, StateStore},
    target::Target,
};

pub struct ResumeController {
    store: Arc<dyn StateStore>,
    discard_corrupt: bool,
    log: ScanLogger,
}

impl ResumeController {
    pub fn new(store: Arc<dyn StateStore>, log: ScanLogger) -> Self {
        Self {
            store,
            discard_corrupt: false,
            log,
        }
    }

    /// Start fresh instead of failing when the checkpoint cannot be parsed
    pub fn discard_corrupt_state(mut self, discard: bool) -> Self {
        self.discard_corrupt = discard;
        self
    }

    /// True when a checkpoint exists and still lists pending targets
    pub async fn should_resume(&self) -> Result<bool> {
        Ok(self.read().await?.is_some_and(|state| !state.is_empty()))
    }

    /// The persisted pending list, verbatim, or empty when there is none
    pub async fn pending_targets(&self) -> Result<Vec<Target>> {
        Ok(self.read().await?.map(|state| state.pending_targets).unwrap_or_default())
    }

    async fn read(&self) -> Result<Option<ScanState>> {
        match self.store.load().await {
            Err(e) if e.is_corrupted_state() && self.discard_corrupt => {
                tracing::warn!(parent: self.log.span(), error = %e, "Discarding unreadable scan state");
                Ok(None)
            }
            other => other,
        }
    }
}
