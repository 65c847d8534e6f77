//! Cooperative cancellation shared between the orchestrator and adapter fits

use crate::error::{ForecastError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation token checked at fit boundaries.
///
/// A child flag observes its parent, so cancelling a run cancels every
/// metric pipeline while cancelling one pipeline leaves its siblings alone.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<CancellationFlag>>,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// A flag that is also cancelled whenever `self` is
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Arc::new(self.clone())),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self.parent.as_ref().map_or(false, |p| p.is_cancelled())
    }

    /// `Err(Cancelled)` once cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ForecastError::Cancelled)
        } else {
            Ok(())
        }
    }
}
