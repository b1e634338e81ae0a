use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use crate::api::{http_client, Pipeline, PipelineDetails, Project, ResourceWatcher};
use crate::credentials::CredentialStore;
use crate::server;

/// How often the project list itself is re-fetched in the watch view.
const PROJECTS_REFRESH_MINUTES: u64 = 5;
/// How often the watch view re-renders from the latest cached values.
const RENDER_SECONDS: u64 = 10;

#[derive(Parser)]
#[command(name = "pipeboard")]
#[command(author, version, about = "Live GitLab pipeline dashboard", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the webhook relay and asset server
    Serve {
        #[arg(short, long, env = "PIPEBOARD_PORT", default_value_t = 3000)]
        port: u16,

        /// Document root for static dashboard assets
        #[arg(short, long, default_value = "./dist")]
        assets: PathBuf,
    },

    /// Poll the GitLab API and print pipeline status per project
    Watch {
        /// Pipeline refresh interval in minutes
        #[arg(short, long, default_value_t = 1)]
        interval: u64,

        /// Only show projects whose path contains this string (persisted)
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Prompt for and store the API URL and access token
    Login,

    /// Remove the stored API credentials
    Logout,
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Serve { port, assets } => {
                server::run_server(*port, assets).await?;
                Ok(())
            }
            Commands::Watch { interval, filter } => {
                self.execute_watch(*interval, filter.as_deref()).await
            }
            Commands::Login => {
                let mut store = CredentialStore::open()?;
                store.clear_credentials()?;
                let credentials = store.ensure()?;
                println!("Stored credentials for {}", credentials.url);
                Ok(())
            }
            Commands::Logout => {
                let mut store = CredentialStore::open()?;
                store.clear_credentials()?;
                println!("Credentials cleared");
                Ok(())
            }
        }
    }

    async fn execute_watch(&self, interval: u64, filter: Option<&str>) -> Result<()> {
        let mut store = CredentialStore::open()?;
        if let Some(filter) = filter {
            store.set_filter(Some(filter.to_string()))?;
        }
        store.ensure()?;

        let filter = store.filter().map(str::to_lowercase);
        let client = http_client()?;

        info!("Watching pipelines (refresh every {interval}m)");

        let projects: ResourceWatcher<Vec<Project>> = ResourceWatcher::spawn(
            client.clone(),
            store.subscribe(),
            "projects",
            Some(Duration::from_secs(60 * PROJECTS_REFRESH_MINUTES)),
        );

        // One pipeline watcher per visible project, keyed by project id.
        // Watchers for projects that disappear from the list are dropped,
        // which cancels their timers.
        let mut pipelines: HashMap<u64, ResourceWatcher<Vec<Pipeline>>> = HashMap::new();
        // Detail watcher per project, re-keyed onto the newest pipeline.
        let mut details: HashMap<u64, ResourceWatcher<PipelineDetails>> = HashMap::new();

        let mut render = tokio::time::interval(Duration::from_secs(RENDER_SECONDS));
        loop {
            render.tick().await;

            let Some(project_list) = projects.latest() else {
                println!("Loading projects...");
                continue;
            };

            let visible: Vec<Project> = project_list
                .into_iter()
                .filter(|p| !p.archived && p.jobs_enabled)
                .filter(|p| match &filter {
                    Some(f) => p.path_with_namespace.to_lowercase().contains(f),
                    None => true,
                })
                .collect();

            pipelines.retain(|id, _| visible.iter().any(|p| p.id == *id));
            details.retain(|id, _| visible.iter().any(|p| p.id == *id));
            for project in &visible {
                pipelines.entry(project.id).or_insert_with(|| {
                    ResourceWatcher::spawn(
                        client.clone(),
                        store.subscribe(),
                        format!("projects/{}/pipelines", project.id),
                        Some(Duration::from_secs(60 * interval.max(1))),
                    )
                });
            }

            println!();
            for project in &visible {
                let newest = pipelines
                    .get(&project.id)
                    .and_then(|w| w.latest())
                    .map(|list| list.into_iter().next());

                let status = match &newest {
                    None => "loading...".to_string(),
                    Some(None) => "no pipelines".to_string(),
                    Some(Some(pipeline)) => {
                        // Follow the newest pipeline into its detail view;
                        // re-keying discards a previous pipeline's detail.
                        let path =
                            format!("projects/{}/pipelines/{}", project.id, pipeline.id);
                        let watcher = details.entry(project.id).or_insert_with(|| {
                            ResourceWatcher::spawn(
                                client.clone(),
                                store.subscribe(),
                                path.clone(),
                                None,
                            )
                        });
                        watcher.set_path(path);

                        let duration = watcher
                            .latest()
                            .and_then(|d| d.duration)
                            .map(|secs| format!(", {}s", secs.round()))
                            .unwrap_or_default();

                        format!(
                            "{} ({} @ {}{})",
                            pipeline.status.as_str(),
                            pipeline.ref_,
                            &pipeline.sha[..pipeline.sha.len().min(6)],
                            duration
                        )
                    }
                };

                println!("{:<50} {}", project.path_with_namespace, status);
            }
        }
    }
}
