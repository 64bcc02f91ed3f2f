//! Lazily loads exactly one speech model, walking down a tier fallback chain.
//!
//! The first caller performs the load inside a once-cell; concurrent callers
//! block on the same cell and observe its outcome, so a successful load
//! happens at most once per process. A failed attempt leaves the cell empty
//! and the next caller retries the whole chain.

use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{info, warn};

use super::{ModelBackend, ModelTier, SpeechModel};
use crate::error::{ScribeError, TierFailure, TierFailures};

/// Tiers tried after the requested one, in order.
pub const FALLBACK_ALTERNATES: [ModelTier; 3] = [ModelTier::Base, ModelTier::Small, ModelTier::Tiny];

/// Ordered, deduplicated list of tiers to attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChain(Vec<ModelTier>);

impl FallbackChain {
    pub fn new(requested: ModelTier) -> Self {
        Self::from_tiers(std::iter::once(requested).chain(FALLBACK_ALTERNATES))
    }

    /// Keep first occurrence of each tier, preserving order.
    pub fn from_tiers(tiers: impl IntoIterator<Item = ModelTier>) -> Self {
        let mut chain = Vec::new();
        for tier in tiers {
            if !chain.contains(&tier) {
                chain.push(tier);
            }
        }
        Self(chain)
    }

    pub fn requested(&self) -> Option<ModelTier> {
        self.0.first().copied()
    }

    pub fn tiers(&self) -> &[ModelTier] {
        &self.0
    }
}

/// The cached model and how it was obtained
#[derive(Clone)]
pub struct LoadedModel {
    pub tier: ModelTier,
    /// Loaded tier differs from the requested one
    pub degraded: bool,
    pub model: Arc<dyn SpeechModel>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("tier", &self.tier)
            .field("degraded", &self.degraded)
            .finish_non_exhaustive()
    }
}

pub struct ModelLoader {
    backend: Box<dyn ModelBackend>,
    chain: FallbackChain,
    auto_downgrade: bool,
    cell: OnceCell<LoadedModel>,
}

impl ModelLoader {
    pub fn new(backend: impl ModelBackend + 'static, requested: ModelTier, auto_downgrade: bool) -> Self {
        Self::with_chain(backend, FallbackChain::new(requested), auto_downgrade)
    }

    pub fn with_chain(
        backend: impl ModelBackend + 'static,
        chain: FallbackChain,
        auto_downgrade: bool,
    ) -> Self {
        Self {
            backend: Box::new(backend),
            chain,
            auto_downgrade,
            cell: OnceCell::new(),
        }
    }

    /// Return the cached model, loading it on first use.
    pub fn get(&self) -> Result<&LoadedModel, ScribeError> {
        self.cell.get_or_try_init(|| self.load_chain())
    }

    /// The cached model, without triggering a load.
    pub fn loaded(&self) -> Option<&LoadedModel> {
        self.cell.get()
    }

    pub fn chain(&self) -> &FallbackChain {
        &self.chain
    }

    fn load_chain(&self) -> Result<LoadedModel, ScribeError> {
        let requested = self.chain.requested();
        let mut failures = Vec::new();

        for &tier in self.chain.tiers() {
            match self.backend.load(tier) {
                Ok(model) => {
                    let degraded = Some(tier) != requested;
                    if degraded {
                        warn!(
                            "Loaded fallback model {} instead of {:?} after {} failure(s)",
                            tier,
                            requested,
                            failures.len()
                        );
                    } else {
                        info!("Loaded requested model {}", tier);
                    }
                    return Ok(LoadedModel { tier, degraded, model });
                }
                Err(reason) => {
                    warn!("Failed to load model {}: {}", tier, reason);
                    failures.push(TierFailure { tier, reason });
                    if !self.auto_downgrade {
                        break;
                    }
                }
            }
        }

        Err(ScribeError::ModelUnavailable(TierFailures(failures)))
    }
}
