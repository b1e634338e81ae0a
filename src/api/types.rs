use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Final status of a CI pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Running,
    Pending,
    Success,
    Failed,
    Canceled,
    Skipped,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Running => "running",
            PipelineStatus::Pending => "pending",
            PipelineStatus::Success => "success",
            PipelineStatus::Failed => "failed",
            PipelineStatus::Canceled => "canceled",
            PipelineStatus::Skipped => "skipped",
        }
    }
}

/// A GitLab project as returned by `GET /projects`.
///
/// Only the fields the dashboard reads are decoded; everything else in the
/// payload is ignored. `_links` carries the hypermedia links followed via
/// [`crate::api::links`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    pub path_with_namespace: String,
    #[serde(default)]
    pub default_branch: Option<String>,
    pub web_url: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default = "default_jobs_enabled")]
    pub jobs_enabled: bool,
    #[serde(rename = "_links", default)]
    pub links: HashMap<String, String>,
}

fn default_jobs_enabled() -> bool {
    true
}

/// A pipeline summary as returned by `GET /projects/{id}/pipelines`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: u64,
    pub sha: String,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub status: PipelineStatus,
    pub web_url: String,
}

/// Pipeline detail as returned by `GET /projects/{id}/pipelines/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDetails {
    pub id: u64,
    pub status: PipelineStatus,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub sha: String,
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub duration: Option<f64>,
    pub web_url: String,
}
