//! Template slots, combinations, and the combination generator.
//!
//! [`generate`] expands a template's variables plus the operator's asset
//! selections into concrete [`Combination`]s: the cartesian product over
//! every unlocked, selected slot, with locked slots pinned to their first
//! candidate in every row. Generation is eager-capped so very large
//! fan-outs never materialise past `max_combinations`.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::{AssetId, CombinationId};

// ---------------------------------------------------------------------------
// Slots and selections
// ---------------------------------------------------------------------------

/// Kind of content a template variable accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotType {
    Text,
    Image,
    Video,
    Audio,
}

impl SlotType {
    /// Media slots are filled with a resolved asset URL, text slots with
    /// literal copy.
    pub fn is_media(self) -> bool {
        !matches!(self, SlotType::Text)
    }
}

/// One template variable and its pool of candidate assets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub name: String,
    #[serde(rename = "type")]
    pub slot_type: SlotType,
    /// A locked slot uses its first candidate in every combination.
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub candidate_asset_ids: Vec<AssetId>,
}

/// The operator's selection for one slot: a single asset or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selection {
    One(AssetId),
    Many(Vec<AssetId>),
}

impl Selection {
    /// Selected assets in selection order.
    pub fn assets(&self) -> &[AssetId] {
        match self {
            Selection::One(id) => std::slice::from_ref(id),
            Selection::Many(ids) => ids,
        }
    }
}

// ---------------------------------------------------------------------------
// Combinations
// ---------------------------------------------------------------------------

/// Render state of a combination as seen by the owner of the working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CombinationStatus {
    Pending,
    Generating,
    Completed,
    Failed,
}

/// One concrete assignment of assets to every template variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Combination {
    pub id: CombinationId,
    /// Slot name to assigned asset, in template declaration order. `None`
    /// marks a slot with nothing selected.
    pub assignments: IndexMap<String, Option<AssetId>>,
    pub status: CombinationStatus,
    /// Completion percentage (0-100).
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(default)]
    pub is_favourite: bool,
}

impl Combination {
    fn new(assignments: IndexMap<String, Option<AssetId>>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            assignments,
            status: CombinationStatus::Pending,
            progress: 0,
            preview_url: None,
            is_favourite: false,
        }
    }
}

/// A one-way job-progress event addressed to a combination by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CombinationUpdate {
    pub combination_id: CombinationId,
    pub status: CombinationStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Options for [`generate`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOptions {
    /// Stop once this many combinations have been produced.
    #[serde(default)]
    pub max_combinations: Option<usize>,
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// How a single slot contributes to every generated row.
enum Assignment<'a> {
    Fixed(Option<&'a AssetId>),
    Varying { dim: usize },
}

/// Expand slots and selections into combinations.
///
/// Candidates for a slot come from `selections` when the slot is present
/// there, otherwise from the slot's own `candidate_asset_ids`. Order is
/// deterministic: the first declared varying slot is the outermost loop,
/// candidates iterate in selection order. Every combination gets a fresh
/// id and starts `pending` at 0%.
///
/// Returns an empty set when no slot contributes any asset.
pub fn generate(
    variables: &[Slot],
    selections: &HashMap<String, Selection>,
    options: &GenerateOptions,
) -> Vec<Combination> {
    let mut plan: Vec<(&str, Assignment<'_>)> = Vec::with_capacity(variables.len());
    let mut dims: Vec<&[AssetId]> = Vec::new();

    for slot in variables {
        let candidates = selections
            .get(&slot.name)
            .map(Selection::assets)
            .unwrap_or(slot.candidate_asset_ids.as_slice());

        let assignment = if slot.locked || candidates.is_empty() {
            Assignment::Fixed(candidates.first())
        } else {
            dims.push(candidates);
            Assignment::Varying {
                dim: dims.len() - 1,
            }
        };
        plan.push((slot.name.as_str(), assignment));
    }

    let contributes = !dims.is_empty()
        || plan
            .iter()
            .any(|(_, a)| matches!(a, Assignment::Fixed(Some(_))));
    let cap = options.max_combinations.unwrap_or(usize::MAX);
    if !contributes || cap == 0 {
        return Vec::new();
    }

    let total = dims
        .iter()
        .try_fold(1usize, |acc, d| acc.checked_mul(d.len()))
        .unwrap_or(usize::MAX);
    let mut out = Vec::with_capacity(total.min(cap).min(4096));
    let mut cursor = vec![0usize; dims.len()];

    loop {
        let assignments = plan
            .iter()
            .map(|(name, assignment)| {
                let value = match assignment {
                    Assignment::Fixed(asset) => asset.cloned(),
                    Assignment::Varying { dim } => Some(dims[*dim][cursor[*dim]].clone()),
                };
                ((*name).to_string(), value)
            })
            .collect();
        out.push(Combination::new(assignments));

        if out.len() >= cap || !advance(&mut cursor, &dims) {
            break;
        }
    }

    out
}

/// Step the odometer, last dimension fastest. Returns `false` once every
/// position has been visited.
fn advance(cursor: &mut [usize], dims: &[&[AssetId]]) -> bool {
    for dim in (0..cursor.len()).rev() {
        cursor[dim] += 1;
        if cursor[dim] < dims[dim].len() {
            return true;
        }
        cursor[dim] = 0;
    }
    false
}

// ---------------------------------------------------------------------------
// Working-set mutations
// ---------------------------------------------------------------------------

/// Merge a job update into the working set by combination id.
///
/// Returns `false` if no combination carries that id (e.g. the set was
/// regenerated while the job was in flight).
pub fn apply_update(combinations: &mut [Combination], update: &CombinationUpdate) -> bool {
    let Some(combination) = combinations
        .iter_mut()
        .find(|c| c.id == update.combination_id)
    else {
        return false;
    };

    combination.status = update.status;
    combination.progress = update.progress.min(100);
    if update.preview_url.is_some() {
        combination.preview_url = update.preview_url.clone();
    }
    true
}

/// Flip the favourite flag of one combination.
pub fn toggle_favourite(combinations: &mut [Combination], id: &str) -> bool {
    match combinations.iter_mut().find(|c| c.id == id) {
        Some(combination) => {
            combination.is_favourite = !combination.is_favourite;
            true
        }
        None => false,
    }
}
