use std::time::Duration;

use log::debug;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::fetch::ApiFetch;
use crate::credentials::Credentials;

/// Outcome of one fetch cycle inside the polling task.
enum Cycle {
    /// Result applied (or fetch failed and the previous value was kept)
    Done,
    /// The path or credentials changed; the current key is stale
    Rekey,
    /// A channel endpoint went away; stop polling
    Shutdown,
}

/// A polled view of one remote resource, keyed on `(path, credentials)`.
///
/// Spawning issues one immediate fetch; with a refresh period the fetch
/// repeats at that cadence for as long as the key stays current. Whenever the
/// path or the subscribed credentials change, the pending timer and any
/// in-flight request for the old key are dropped and a fresh immediate fetch
/// starts for the new key. The previously applied value keeps being returned
/// until the new fetch resolves, so consumers never see an unrelated error
/// state flash through.
///
/// [`ResourceWatcher::latest`] returns `None` until the first fetch for any
/// key has resolved. `None` is the not-yet-loaded sentinel; resources whose
/// body may legitimately decode to nothing should use `T = Option<U>`.
///
/// Dropping the watcher aborts the polling task: no timer fires and no result
/// is applied after teardown.
pub struct ResourceWatcher<T> {
    path_tx: watch::Sender<String>,
    value_rx: watch::Receiver<Option<T>>,
    task: JoinHandle<()>,
}

impl<T> Drop for ResourceWatcher<T> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl<T> ResourceWatcher<T>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Starts watching `path` with the credentials observed on `creds_rx`.
    ///
    /// # Arguments
    ///
    /// * `client` - Shared HTTP client
    /// * `creds_rx` - Credential subscription from
    ///   [`crate::credentials::CredentialStore::subscribe`]
    /// * `path` - Request path relative to the API base URL
    /// * `refresh` - Optional re-fetch period; `None` (or zero) fetches once
    ///   per key
    pub fn spawn(
        client: Client,
        creds_rx: watch::Receiver<Credentials>,
        path: impl Into<String>,
        refresh: Option<Duration>,
    ) -> Self {
        let (path_tx, path_rx) = watch::channel(path.into());
        let (value_tx, value_rx) = watch::channel(None);

        let task = tokio::spawn(poll_loop(client, creds_rx, path_rx, value_tx, refresh));

        Self {
            path_tx,
            value_rx,
            task,
        }
    }

    /// Latest applied value, or `None` while nothing has loaded yet.
    pub fn latest(&self) -> Option<T> {
        self.value_rx.borrow().clone()
    }

    /// Waits until the next value is applied. Returns `false` if the polling
    /// task has stopped.
    pub async fn changed(&mut self) -> bool {
        self.value_rx.changed().await.is_ok()
    }

    /// Re-keys the watcher onto a new path. A no-op when the path is
    /// unchanged; otherwise the old key's timer and in-flight fetch are
    /// abandoned and an immediate fetch starts for the new key.
    pub fn set_path(&self, path: impl Into<String>) {
        let path = path.into();
        self.path_tx.send_if_modified(|current| {
            if *current != path {
                *current = path;
                true
            } else {
                false
            }
        });
    }
}

async fn poll_loop<T>(
    client: Client,
    mut creds_rx: watch::Receiver<Credentials>,
    mut path_rx: watch::Receiver<String>,
    value_tx: watch::Sender<Option<T>>,
    refresh: Option<Duration>,
) where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let period = refresh.filter(|d| !d.is_zero());

    'rekey: loop {
        // Snapshot the current key; borrow_and_update clears any queued
        // change notification so the key and the subscription stay in step.
        let path = path_rx.borrow_and_update().clone();
        let creds = creds_rx.borrow_and_update().clone();
        let fetch = ApiFetch::new(client.clone(), creds);

        // Immediate fetch for the new key.
        match fetch_cycle(&fetch, &path, &value_tx, &mut path_rx, &mut creds_rx).await {
            Cycle::Done => {}
            Cycle::Rekey => continue 'rekey,
            Cycle::Shutdown => return,
        }

        let Some(period) = period else {
            // One-shot resource: hold the value until the key changes.
            match key_changed(&mut path_rx, &mut creds_rx).await {
                Cycle::Rekey => continue 'rekey,
                _ => return,
            }
        };

        // Ticks start one period after the immediate fetch. A tick that
        // lands while a fetch is still in flight is delayed, not stacked.
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = path_rx.changed() => {
                    if changed.is_ok() {
                        continue 'rekey;
                    }
                    return;
                }
                changed = creds_rx.changed() => {
                    if changed.is_ok() {
                        continue 'rekey;
                    }
                    return;
                }
                _ = ticker.tick() => {
                    match fetch_cycle(&fetch, &path, &value_tx, &mut path_rx, &mut creds_rx).await {
                        Cycle::Done => {}
                        Cycle::Rekey => continue 'rekey,
                        Cycle::Shutdown => return,
                    }
                }
            }
        }
    }
}

/// Runs one fetch, racing it against a key change. If the key changes while
/// the request is in flight, the request future is dropped so its result can
/// never be applied against the newer key.
async fn fetch_cycle<T>(
    fetch: &ApiFetch,
    path: &str,
    value_tx: &watch::Sender<Option<T>>,
    path_rx: &mut watch::Receiver<String>,
    creds_rx: &mut watch::Receiver<Credentials>,
) -> Cycle
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    tokio::select! {
        changed = path_rx.changed() => {
            if changed.is_ok() { Cycle::Rekey } else { Cycle::Shutdown }
        }
        changed = creds_rx.changed() => {
            if changed.is_ok() { Cycle::Rekey } else { Cycle::Shutdown }
        }
        result = fetch.get_json::<T>(path) => {
            match result {
                Ok(value) => {
                    let _ = value_tx.send(Some(value));
                }
                Err(e) => {
                    // Keep the previous value; the consumer sees stale data
                    // or the not-yet-loaded sentinel, never an error flash.
                    debug!("Fetch for '{path}' failed: {e}");
                }
            }
            Cycle::Done
        }
    }
}

async fn key_changed(
    path_rx: &mut watch::Receiver<String>,
    creds_rx: &mut watch::Receiver<Credentials>,
) -> Cycle {
    tokio::select! {
        changed = path_rx.changed() => {
            if changed.is_ok() { Cycle::Rekey } else { Cycle::Shutdown }
        }
        changed = creds_rx.changed() => {
            if changed.is_ok() { Cycle::Rekey } else { Cycle::Shutdown }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::fetch::http_client;
    use crate::credentials::CredentialStore;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn creds_channel(url: &str) -> (watch::Sender<Credentials>, watch::Receiver<Credentials>) {
        watch::channel(Credentials {
            url: url.to_string(),
            token: "test-token".to_string(),
        })
    }

    async fn settle(watcher: &mut ResourceWatcher<serde_json::Value>) {
        assert!(watcher.changed().await, "polling task stopped unexpectedly");
    }

    #[tokio::test]
    async fn test_immediate_fetch_resolves_latest() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/projects")
            .with_body(r#"{"v": "loaded"}"#)
            .create_async()
            .await;

        let (_tx, rx) = creds_channel(&server.url());
        let mut watcher: ResourceWatcher<serde_json::Value> =
            ResourceWatcher::spawn(http_client().unwrap(), rx, "projects", None);

        assert_eq!(watcher.latest(), None);
        settle(&mut watcher).await;
        assert_eq!(watcher.latest().unwrap()["v"], "loaded");
    }

    #[tokio::test]
    async fn test_polling_cadence_and_teardown() {
        let mut server = mockito::Server::new_async().await;
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        server
            .mock("GET", "/projects")
            .with_chunked_body(move |w| {
                counter.fetch_add(1, Ordering::SeqCst);
                w.write_all(b"{}")
            })
            .expect_at_least(1)
            .create_async()
            .await;

        let (_tx, rx) = creds_channel(&server.url());
        let watcher: ResourceWatcher<serde_json::Value> = ResourceWatcher::spawn(
            http_client().unwrap(),
            rx,
            "projects",
            Some(Duration::from_millis(100)),
        );

        // Immediate fetch plus at least two timer cycles.
        tokio::time::sleep(Duration::from_millis(350)).await;
        let before_drop = hits.load(Ordering::SeqCst);
        assert!(
            before_drop >= 3,
            "expected immediate fetch plus timer cycles, got {before_drop}"
        );

        drop(watcher);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(
            hits.load(Ordering::SeqCst),
            before_drop,
            "fetches must stop after teardown"
        );
    }

    #[tokio::test]
    async fn test_stale_key_result_is_discarded() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/slow")
            .with_chunked_body(|w| {
                std::thread::sleep(Duration::from_millis(300));
                w.write_all(br#"{"v": "stale"}"#)
            })
            .create_async()
            .await;
        server
            .mock("GET", "/fast")
            .with_body(r#"{"v": "current"}"#)
            .create_async()
            .await;

        let (_tx, rx) = creds_channel(&server.url());
        let mut watcher: ResourceWatcher<serde_json::Value> =
            ResourceWatcher::spawn(http_client().unwrap(), rx, "slow", None);

        // Abandon the slow key while its fetch is still in flight.
        tokio::time::sleep(Duration::from_millis(50)).await;
        watcher.set_path("fast");

        settle(&mut watcher).await;
        assert_eq!(watcher.latest().unwrap()["v"], "current");

        // Long enough for the slow response to have resolved had it survived.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(watcher.latest().unwrap()["v"], "current");
    }

    #[tokio::test]
    async fn test_previous_value_kept_while_new_key_loads() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/first")
            .with_body(r#"{"v": "first"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/second")
            .with_chunked_body(|w| {
                std::thread::sleep(Duration::from_millis(200));
                w.write_all(br#"{"v": "second"}"#)
            })
            .create_async()
            .await;

        let (_tx, rx) = creds_channel(&server.url());
        let mut watcher: ResourceWatcher<serde_json::Value> =
            ResourceWatcher::spawn(http_client().unwrap(), rx, "first", None);

        settle(&mut watcher).await;
        watcher.set_path("second");

        // Old value stays visible until the new key resolves.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(watcher.latest().unwrap()["v"], "first");

        settle(&mut watcher).await;
        assert_eq!(watcher.latest().unwrap()["v"], "second");
    }

    #[tokio::test]
    async fn test_credential_change_refetches_with_new_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/projects")
            .match_header("authorization", "Bearer first")
            .with_body(r#"{"token": "first"}"#)
            .create_async()
            .await;
        let renewed = server
            .mock("GET", "/projects")
            .match_header("authorization", "Bearer second")
            .with_body(r#"{"token": "second"}"#)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut store = CredentialStore::open_at(&dir.path().join("credentials.toml")).unwrap();
        store
            .set_credentials(server.url(), "first".into())
            .unwrap();

        let mut watcher: ResourceWatcher<serde_json::Value> = ResourceWatcher::spawn(
            http_client().unwrap(),
            store.subscribe(),
            "projects",
            None,
        );

        settle(&mut watcher).await;
        assert_eq!(watcher.latest().unwrap()["token"], "first");

        store
            .set_credentials(server.url(), "second".into())
            .unwrap();

        settle(&mut watcher).await;
        assert_eq!(watcher.latest().unwrap()["token"], "second");
        renewed.assert_async().await;
    }
}
