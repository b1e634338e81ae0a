mod fetch;
mod links;
mod resource;
mod types;

pub use fetch::{http_client, ApiFetch};
pub use links::{link_path, resolve_link, HasLinks};
pub use resource::ResourceWatcher;
pub use types::{Pipeline, PipelineDetails, PipelineStatus, Project};
