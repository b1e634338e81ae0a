use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::api::PipelineStatus;
use crate::server::socket::SocketChannel;
use crate::server::AppState;

/// Header GitLab sets on every webhook delivery.
pub const GITLAB_EVENT_HEADER: &str = "x-gitlab-event";
/// Header value identifying a pipeline status change.
pub const PIPELINE_HOOK_EVENT: &str = "Pipeline Hook";

/// Inbound GitLab pipeline webhook payload.
///
/// Only the subset needed for the viewer notification is decoded; the
/// commit, user and per-build sections of the payload are dropped here and
/// never reach viewers.
#[derive(Debug, Deserialize)]
pub struct PipelineHook {
    pub object_attributes: HookAttributes,
    pub project: HookProject,
}

#[derive(Debug, Deserialize)]
pub struct HookAttributes {
    pub id: u64,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub sha: String,
    pub status: PipelineStatus,
    /// Timestamps pass through verbatim; GitLab's webhook time format is
    /// not the ISO form its REST API uses.
    pub created_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HookProject {
    pub id: u64,
    pub path_with_namespace: String,
}

/// The minimal pipeline event pushed to viewers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineNotification {
    pub object_attributes: NotificationAttributes,
    pub project: NotificationProject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAttributes {
    pub id: u64,
    #[serde(rename = "ref")]
    pub ref_: String,
    pub sha: String,
    pub status: PipelineStatus,
    pub created_at: String,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationProject {
    pub id: u64,
    pub path_with_namespace: String,
}

impl From<PipelineHook> for PipelineNotification {
    fn from(hook: PipelineHook) -> Self {
        Self {
            object_attributes: NotificationAttributes {
                id: hook.object_attributes.id,
                ref_: hook.object_attributes.ref_,
                sha: hook.object_attributes.sha,
                status: hook.object_attributes.status,
                created_at: hook.object_attributes.created_at,
                finished_at: hook.object_attributes.finished_at,
            },
            project: NotificationProject {
                id: hook.project.id,
                path_with_namespace: hook.project.path_with_namespace,
            },
        }
    }
}

/// Webhook ingress handler.
///
/// GitLab gets `200 OK` as soon as the body has arrived; parse or projection
/// problems are logged and swallowed so a malformed delivery can never take
/// the relay down or leak past this boundary. Requests without the pipeline
/// event header are not webhook traffic and get a 404, matching what the
/// asset fallback would say about an unknown path.
pub async fn ingress(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let event = headers
        .get(GITLAB_EVENT_HEADER)
        .and_then(|v| v.to_str().ok());

    if event != Some(PIPELINE_HOOK_EVENT) {
        return StatusCode::NOT_FOUND.into_response();
    }

    match serde_json::from_slice::<PipelineHook>(&body) {
        Ok(hook) => {
            let notification = PipelineNotification::from(hook);
            info!(
                "Pipeline change hook: {} #{} is {}",
                notification.project.path_with_namespace,
                notification.object_attributes.id,
                notification.object_attributes.status.as_str(),
            );
            state.publish(SocketChannel::Pipeline, notification);
        }
        Err(e) => warn!("Discarding malformed pipeline hook: {e}"),
    }

    "OK".into_response()
}
