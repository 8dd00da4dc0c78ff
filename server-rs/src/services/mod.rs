pub mod collaborators;
pub mod comment_cache;
pub mod comment_service;
pub mod engagement;
pub mod hierarchy;
pub mod moderation;
pub mod quote;
pub mod sanitizer;
pub mod store;

use crate::error::SideEffectError;

/// Outcome of the best-effort calls made alongside a primary operation.
#[derive(Debug, Clone, Default)]
pub struct SideEffects {
    pub failures: Vec<SideEffectError>,
}

impl SideEffects {
    pub fn record(&mut self, result: Result<(), SideEffectError>) {
        if let Err(e) = result {
            tracing::warn!(effect = e.effect, "side effect failed: {}", e.message);
            self.failures.push(e);
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
