use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::api::resource::ResourceWatcher;
use crate::api::types::Project;
use crate::credentials::Credentials;

/// A resource carrying a GitLab `_links` map of named related URLs.
pub trait HasLinks {
    fn links(&self) -> &HashMap<String, String>;
}

impl HasLinks for Project {
    fn links(&self) -> &HashMap<String, String> {
        &self.links
    }
}

/// Rewrites a link URL into a request path relative to the API base.
fn relative_to_base(url: &str, base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    url.strip_prefix(base)
        .unwrap_or(url)
        .trim_start_matches('/')
        .to_string()
}

/// Resolves a named link on `origin` to a base-relative request path.
///
/// Returns `None` without touching the network when the origin has not
/// loaded yet or carries no link under `name`.
pub fn link_path<L: HasLinks>(origin: Option<&L>, name: &str, base_url: &str) -> Option<String> {
    let url = origin?.links().get(name)?;
    Some(relative_to_base(url, base_url))
}

/// Follows a named hypermedia link through the polling cache.
///
/// The linked resource is fetched once through the same credential-bound
/// path as any other resource, with no recurring refresh. `None` means the
/// link could not be resolved (origin not loaded, or no such link) and no
/// fetch was issued.
pub fn resolve_link<L, Linked>(
    client: Client,
    creds_rx: watch::Receiver<Credentials>,
    origin: Option<&L>,
    name: &str,
) -> Option<ResourceWatcher<Linked>>
where
    L: HasLinks,
    Linked: DeserializeOwned + Clone + Send + Sync + 'static,
{
    let base_url = creds_rx.borrow().url.clone();
    let path = link_path(origin, name, &base_url)?;

    let refresh: Option<Duration> = None;
    Some(ResourceWatcher::spawn(client, creds_rx, path, refresh))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fetch::http_client;

    struct Linked(HashMap<String, String>);

    impl HasLinks for Linked {
        fn links(&self) -> &HashMap<String, String> {
            &self.0
        }
    }

    fn origin_with(name: &str, url: &str) -> Linked {
        Linked(HashMap::from([(name.to_string(), url.to_string())]))
    }

    #[test]
    fn test_link_path_strips_api_base() {
        let origin = origin_with("self", "https://api.example/projects/7");
        assert_eq!(
            link_path(Some(&origin), "self", "https://api.example"),
            Some("projects/7".to_string())
        );
    }

    #[test]
    fn test_link_path_tolerates_trailing_base_slash() {
        let origin = origin_with("issues", "https://api.example/projects/7/issues");
        assert_eq!(
            link_path(Some(&origin), "issues", "https://api.example/"),
            Some("projects/7/issues".to_string())
        );
    }

    #[test]
    fn test_link_path_on_unloaded_origin_is_none() {
        assert_eq!(link_path(None::<&Linked>, "self", "https://api.example"), None);
    }

    #[test]
    fn test_link_path_on_absent_name_is_none() {
        let origin = origin_with("self", "https://api.example/projects/7");
        assert_eq!(link_path(Some(&origin), "issues", "https://api.example"), None);
    }

    #[test]
    fn test_foreign_url_passes_through_unstripped() {
        let origin = origin_with("self", "https://elsewhere.example/projects/7");
        assert_eq!(
            link_path(Some(&origin), "self", "https://api.example"),
            Some("https://elsewhere.example/projects/7".to_string())
        );
    }

    #[tokio::test]
    async fn test_resolve_link_fetches_linked_resource() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/projects/7")
            .with_body(r#"{"id": 7}"#)
            .create_async()
            .await;

        let (_tx, rx) = watch::channel(Credentials {
            url: server.url(),
            token: "tok".to_string(),
        });

        let origin = origin_with("self", &format!("{}/projects/7", server.url()));
        let mut watcher: ResourceWatcher<serde_json::Value> =
            resolve_link(http_client().unwrap(), rx, Some(&origin), "self").unwrap();

        assert!(watcher.changed().await);
        assert_eq!(watcher.latest().unwrap()["id"], 7);
    }

    #[tokio::test]
    async fn test_resolve_link_absent_name_issues_no_fetch() {
        let (_tx, rx) = watch::channel(Credentials {
            url: "https://api.example".to_string(),
            token: "tok".to_string(),
        });

        let origin = origin_with("self", "https://api.example/projects/7");
        let watcher: Option<ResourceWatcher<serde_json::Value>> =
            resolve_link(http_client().unwrap(), rx, Some(&origin), "issues");

        assert!(watcher.is_none());
    }
}
