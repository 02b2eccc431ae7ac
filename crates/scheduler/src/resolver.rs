//! Turning a combination's asset assignments into renderer modifications.

use std::collections::HashMap;

use renderflow_core::combination::Combination;

/// Resolves asset ids to the literal text or URL the renderer expects.
pub trait AssetResolver: Send + Sync {
    fn modifications(&self, combination: &Combination) -> HashMap<String, String>;
}

/// Sends asset references through unchanged and leaves empty slots out.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughResolver;

impl AssetResolver for PassThroughResolver {
    fn modifications(&self, combination: &Combination) -> HashMap<String, String> {
        combination
            .assignments
            .iter()
            .filter_map(|(slot, asset)| asset.as_ref().map(|a| (slot.clone(), a.clone())))
            .collect()
    }
}
