//! Render job types, priorities, and the job status state machine.
//!
//! These types are shared by the render adapter (which owns live job
//! state), the scheduler (which owns the pending queue), and the HTTP
//! layer (which serialises them onto the wire).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::combination::CombinationStatus;
use crate::types::{CombinationId, JobId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a render job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl RenderStatus {
    /// `Completed` and `Failed` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, RenderStatus::Completed | RenderStatus::Failed)
    }

    /// Progress implied by the status when the backend reports none.
    pub fn default_progress(self) -> u8 {
        match self {
            RenderStatus::Queued => 0,
            RenderStatus::Processing => 50,
            RenderStatus::Completed => 100,
            RenderStatus::Failed => 0,
        }
    }

    /// The owner-facing combination status for this job status.
    pub fn combination_status(self) -> CombinationStatus {
        match self {
            RenderStatus::Queued | RenderStatus::Processing => CombinationStatus::Generating,
            RenderStatus::Completed => CombinationStatus::Completed,
            RenderStatus::Failed => CombinationStatus::Failed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RenderStatus::Queued => "queued",
            RenderStatus::Processing => "processing",
            RenderStatus::Completed => "completed",
            RenderStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RenderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RenderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RenderStatus::Queued),
            "processing" => Ok(RenderStatus::Processing),
            "completed" => Ok(RenderStatus::Completed),
            "failed" => Ok(RenderStatus::Failed),
            other => Err(format!("Unknown render status: {other}")),
        }
    }
}

/// Monotonic job status transitions.
///
/// `queued -> processing -> {completed | failed}`; a backend may skip
/// `processing` entirely. Terminal states have no outgoing transitions.
pub mod state_machine {
    use super::RenderStatus::{self, *};

    /// Returns the set of statuses reachable from `from`.
    pub fn valid_transitions(from: RenderStatus) -> &'static [RenderStatus] {
        match from {
            Queued => &[Processing, Completed, Failed],
            Processing => &[Completed, Failed],
            Completed | Failed => &[],
        }
    }

    /// Check whether a transition from `from` to `to` is valid.
    pub fn can_transition(from: RenderStatus, to: RenderStatus) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a state transition, returning an error message for invalid ones.
    pub fn validate_transition(from: RenderStatus, to: RenderStatus) -> Result<(), String> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(format!("Invalid transition: {from} -> {to}"))
        }
    }
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Scheduling weight. Ordered so that `High > Normal > Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

// ---------------------------------------------------------------------------
// Requests and reports
// ---------------------------------------------------------------------------

/// Output container requested from the renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Gif,
    Png,
    Jpg,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Gif => "gif",
            OutputFormat::Png => "png",
            OutputFormat::Jpg => "jpg",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mp4" => Ok(OutputFormat::Mp4),
            "gif" => Ok(OutputFormat::Gif),
            "png" => Ok(OutputFormat::Png),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpg),
            other => Err(format!("Unknown output format: {other}")),
        }
    }
}

/// A creation request for the external renderer.
///
/// `modifications` maps slot identifiers to literal text or an already
/// resolved asset URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    #[validate(length(min = 1, message = "templateId is required"))]
    pub template_id: String,
    #[serde(default)]
    pub modifications: HashMap<String, String>,
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Campaign the render belongs to, used for execution records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_id: Option<String>,
}

/// Status report from the renderer, via polling or webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderStatusReport {
    pub job_id: JobId,
    pub status: RenderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Point-in-time view of a job tracked by the render adapter.
///
/// `revision` increases with every applied change so consumers can drop
/// deliveries that arrive out of order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderSnapshot {
    pub job_id: JobId,
    pub template_id: String,
    pub status: RenderStatus,
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Poll attempts consumed so far.
    pub attempts: u32,
    pub revision: u64,
    pub updated_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Scheduler job
// ---------------------------------------------------------------------------

/// A unit of rendering work for one combination, as tracked by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
    /// Scheduler-assigned id, stable from enqueue onwards.
    pub id: String,
    pub combination_id: CombinationId,
    pub template_id: String,
    pub priority: Priority,
    pub status: RenderStatus,
    pub progress: u8,
    /// Backend job id once submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempts: u32,
}
