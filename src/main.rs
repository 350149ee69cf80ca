#![deny(clippy::all)]

mod credentials;
mod error;
mod extraction;
mod layout;
mod scheduler;
mod session;
mod settings;
mod structure;
mod structuring;
mod transcript;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};

use extraction::ExtractionClient;
use scheduler::backend::{LiveBackend, UpdateBackend};
use scheduler::{SchedulerEvent, SchedulerHandle, SchedulerSettings, UpdateScheduler};
use session::{DiskSessionStore, MemorySessionStore, SessionStore};
use settings::{InterpretationLevel, LlmProvider};
use structure::{GraphStructure, NodeCategory, StructureMode, StructureState, TreeStructure};
use structuring::{ProviderClient, StructuringClient};
use transcript::TranscriptFragment;

/// Application configuration
#[derive(serde::Deserialize)]
struct Config {
    scheduler: SchedulerConfig,
}

#[derive(serde::Deserialize)]
struct SchedulerConfig {
    tick_seconds: u64,
    full_regen_every: u32,
    snapshot_every: u32,
    max_context_chars: usize,
}

/// Load configuration from embedded config.toml
fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    const CONFIG_TOML: &str = include_str!("../config.toml");
    let config: Config = toml::from_str(CONFIG_TOML)?;
    Ok(config)
}

fn parse_provider(raw: &str) -> Option<LlmProvider> {
    match raw.to_ascii_lowercase().as_str() {
        "anthropic" => Some(LlmProvider::Anthropic),
        "openai" => Some(LlmProvider::OpenAI),
        _ => None,
    }
}

fn parse_level(raw: &str) -> Option<InterpretationLevel> {
    match raw.to_ascii_lowercase().as_str() {
        "literal" => Some(InterpretationLevel::Literal),
        "thematic" => Some(InterpretationLevel::Thematic),
        "critical" => Some(InterpretationLevel::Critical),
        _ => None,
    }
}

/// Persist environment overrides into the settings file before this run
/// reads it, so overrides behave exactly like settings changed in a UI.
fn apply_env_overrides() {
    if let Ok(raw) = std::env::var("MINDMESH_PROVIDER") {
        match parse_provider(&raw) {
            Some(provider) => {
                if let Err(e) = settings::set_llm_provider(provider) {
                    warn!(error = %e, "Failed to persist provider override");
                }
            }
            None => warn!(value = %raw, "MINDMESH_PROVIDER must be anthropic or openai"),
        }
    }
    if let Ok(raw) = std::env::var("MINDMESH_INTERPRETATION_LEVEL") {
        match parse_level(&raw) {
            Some(level) => {
                if let Err(e) = settings::set_interpretation_level(level) {
                    warn!(error = %e, "Failed to persist interpretation level override");
                }
            }
            None => {
                warn!(value = %raw, "MINDMESH_INTERPRETATION_LEVEL must be literal, thematic or critical")
            }
        }
    }
    if let Ok(raw) = std::env::var("MINDMESH_EXTRACTION_URL") {
        let url = if raw.trim().is_empty() { None } else { Some(raw) };
        if let Err(e) = settings::set_extraction_url(url) {
            warn!(error = %e, "Failed to persist extraction URL override");
        }
    }
    if let Ok(raw) = std::env::var("MINDMESH_SESSION_DIR") {
        let location = if raw.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(raw))
        };
        if let Err(e) = settings::set_session_location(location) {
            warn!(error = %e, "Failed to persist session directory override");
        }
    }
}

fn new_session_title() -> String {
    format!("Session {}", chrono::Local::now().format("%Y-%m-%d %H:%M"))
}

/// Structure slot of a session record as a structure state.
fn record_structure(
    tree: Option<TreeStructure>,
    graph: Option<GraphStructure>,
) -> StructureState {
    match (tree, graph) {
        (Some(tree), _) => StructureState::Tree(tree),
        (_, Some(graph)) => StructureState::Graph(graph),
        (None, None) => StructureState::Empty,
    }
}

fn log_structure(state: &StructureState) {
    match state {
        StructureState::Empty => info!("No structure yet"),
        StructureState::Tree(tree) => {
            let mut decisions = 0;
            let mut actions = 0;
            tree.root.walk(&mut |node| match node.category {
                NodeCategory::Decision => decisions += 1,
                NodeCategory::Action => actions += 1,
                _ => {}
            });
            info!(
                nodes = tree.node_count(),
                cross_references = tree.cross_references.len(),
                decisions,
                actions,
                version = tree.metadata.version,
                "Topic tree"
            );
        }
        StructureState::Graph(graph) if graph.is_empty() => info!("Graph holds no entities yet"),
        StructureState::Graph(graph) => info!(
            entities = graph.entities.len(),
            relationships = graph.relationships.len(),
            "Knowledge graph"
        ),
    }
}

/// Console commands standing in for the controls of a full frontend.
struct Console {
    handle: SchedulerHandle,
    scheduler_settings: SchedulerSettings,
    extraction: Option<ExtractionClient>,
    session_id: String,
    session_dir: Option<PathBuf>,
}

impl Console {
    async fn run_command(&mut self, command: &str) {
        let mut parts = command.split_whitespace();
        match parts.next() {
            Some("update") => self.handle.tick(),
            Some("regenerate") => {
                self.handle.force_full_regeneration();
                info!("Next update will regenerate the full map");
            }
            Some("dismiss") => self.handle.dismiss_error(),
            Some("level") => match parts.next().and_then(parse_level) {
                Some(level) => {
                    self.scheduler_settings.interpretation_level = level;
                    self.handle.update_settings(self.scheduler_settings.clone());
                }
                None => warn!("Usage: /level literal|thematic|critical"),
            },
            Some("status") => {
                if let Some(status) = self.handle.status().await {
                    info!(
                        processing = status.processing,
                        version = status.version,
                        updates = status.successful_updates,
                        pending = status.pending_fragments,
                        mode = %status.mode,
                        "Scheduler status"
                    );
                    if let Some(error) = status.last_error {
                        warn!(%error, "Retained error, send /dismiss to clear");
                    }
                }
            }
            Some("structure") => {
                if let Some(state) = self.handle.structure().await {
                    log_structure(&state);
                }
            }
            Some("changes") => {
                let ids = self.handle.active_changes().await.unwrap_or_default();
                info!(active = ids.len(), "Ids in the highlight window: {:?}", ids);
            }
            Some("transcript") => {
                if let Some(transcript) = self.handle.transcript().await {
                    println!("{transcript}");
                }
            }
            Some("search") => {
                let query = parts.collect::<Vec<_>>().join(" ");
                match &self.extraction {
                    Some(client) if !query.is_empty() => {
                        match client.search(&self.session_id, &query).await {
                            Ok(results) => {
                                info!(count = results.len(), "Search results");
                                for result in results {
                                    println!(
                                        "- {} ({} -> {})",
                                        result.fact, result.source, result.target
                                    );
                                }
                            }
                            Err(e) => warn!(error = %e, "Search failed"),
                        }
                    }
                    Some(_) => warn!("Usage: /search <query>"),
                    None => warn!("Search needs a healthy extraction service"),
                }
            }
            Some("graph") => match &self.extraction {
                Some(client) => match client.get_graph(&self.session_id).await {
                    Ok(graph) => log_structure(&StructureState::Graph(graph)),
                    Err(e) => warn!(error = %e, "Graph fetch failed"),
                },
                None => warn!("Graph fetch needs a healthy extraction service"),
            },
            Some("new") => {
                let session_id = session::new_session_id();
                info!(session_id = %session_id, "Starting new session");
                self.handle
                    .start_new_session(session_id.clone(), new_session_title());
                self.session_id = session_id;
            }
            Some("sessions") => match &self.session_dir {
                Some(dir) => match DiskSessionStore::new(dir.clone()).list() {
                    Ok(ids) => {
                        info!(count = ids.len(), "Saved sessions");
                        for id in ids {
                            println!("- {id}");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to list sessions"),
                },
                None => warn!("No session directory configured"),
            },
            Some("load") => match (parts.next(), &self.session_dir) {
                (Some(id), Some(dir)) => {
                    let store = DiskSessionStore::new(dir.clone());
                    match store.load(id) {
                        Ok(record) => {
                            info!(
                                title = %record.title,
                                chars = record.transcript.chars().count(),
                                "Loaded session"
                            );
                            log_structure(&record_structure(
                                record.tree_structure,
                                record.graph_structure,
                            ));
                        }
                        Err(e) => warn!(error = %e, "Failed to load session"),
                    }
                }
                (None, _) => warn!("Usage: /load <session-id>"),
                (_, None) => warn!("No session directory configured"),
            },
            Some("help") | None => {
                info!(
                    "Commands: /update /regenerate /dismiss /level <l> /status /structure \
                     /changes /transcript /search <q> /graph /new /sessions /load <id> /help"
                );
            }
            Some(other) => warn!(command = %other, "Unknown command, /help lists commands"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for structured logging
    tracing_subscriber::fmt::init();

    // Pick up keys from a local .env before reading the environment
    dotenvy::dotenv().ok();

    // Load configuration from embedded config.toml
    let config = load_config()?;
    apply_env_overrides();

    let provider = settings::get_llm_provider();
    let level = settings::get_interpretation_level();
    info!("Selected reasoning provider: {}", provider);

    let has_credentials = credentials::has_credentials(provider);
    if has_credentials {
        info!("{} API key found in environment", provider);
    } else {
        info!(
            "No {} API key found - fragments will buffer until one is configured",
            provider
        );
    }

    let creds = credentials::resolve(provider).ok();
    let structuring = creds.as_ref().and_then(|creds| {
        match ProviderClient::new(provider, &creds.api_key) {
            Ok(client) => {
                let client = StructuringClient::new(client);
                info!(provider = %client.provider(), "Structuring client ready");
                Some(client)
            }
            Err(e) => {
                warn!(error = %e, "Failed to build structuring client");
                None
            }
        }
    });

    // A configured extraction service switches the session to graph mode,
    // but only after it answers the health probe
    let extraction = match (settings::get_extraction_url(), &creds) {
        (Some(url), Some(creds)) => {
            match ExtractionClient::new(
                &url,
                provider,
                &creds.api_key,
                creds.embedder_api_key.as_deref(),
            ) {
                Ok(client) => {
                    if client.health().await {
                        info!(url = %url, "Extraction service healthy, session runs in graph mode");
                        Some(client)
                    } else {
                        warn!(url = %url, "Extraction service not responding, falling back to tree mode");
                        None
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Ignoring invalid extraction service URL");
                    None
                }
            }
        }
        (Some(url), None) => {
            warn!(url = %url, "Extraction service configured but no provider key available");
            None
        }
        (None, _) => None,
    };
    let mode = if extraction.is_some() {
        StructureMode::Graph
    } else {
        StructureMode::Tree
    };
    let console_extraction = extraction.clone();

    let session_dir = settings::get_session_location().or_else(settings::default_session_location);
    let session_store: Box<dyn SessionStore> = match &session_dir {
        Some(dir) => Box::new(DiskSessionStore::new(dir.clone())),
        None => {
            warn!("No session directory available, sessions stay in memory only");
            Box::new(MemorySessionStore::new())
        }
    };

    let scheduler_settings = SchedulerSettings {
        interpretation_level: level,
        tick_interval: Duration::from_secs(config.scheduler.tick_seconds),
        max_context_chars: config.scheduler.max_context_chars,
        full_regen_every: config.scheduler.full_regen_every,
        snapshot_every: config.scheduler.snapshot_every,
    };

    let session_id = session::new_session_id();
    let session_title = new_session_title();

    let backend = Arc::new(LiveBackend::new(structuring, extraction));
    info!(
        session_id = %session_id,
        mode = %mode,
        configured = backend.is_configured(),
        extraction = backend.has_extraction(),
        "Starting session"
    );
    let handle = UpdateScheduler::spawn(
        backend,
        session_store,
        mode,
        scheduler_settings.clone(),
        session_id.clone(),
        session_title,
    );

    // Event log mirrors what a frontend would render
    let mut events = handle.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SchedulerEvent::StructureUpdated {
                    version,
                    changed_ids,
                }) => info!(version, changed = changed_ids.len(), "Structure updated"),
                Ok(SchedulerEvent::UpdateFailed { message }) => warn!(%message, "Update failed"),
                Ok(SchedulerEvent::SnapshotReady { version, .. }) => {
                    info!(version, "Session snapshot saved")
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream lagged")
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut console = Console {
        handle: handle.clone(),
        scheduler_settings,
        extraction: console_extraction,
        session_id,
        session_dir,
    };

    info!(
        "Reading transcript from stdin: '[Speaker N]: text' lines, blank line marks an \
         utterance boundary, /help lists commands, Ctrl-C stops the session"
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let started = Instant::now();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(command) = line.strip_prefix('/') {
                        console.run_command(command).await;
                    } else if line.trim().is_empty() {
                        handle.on_boundary();
                    } else {
                        let timestamp = started.elapsed().as_secs_f64();
                        handle.enqueue(TranscriptFragment::parse_line(&line, timestamp));
                    }
                }
                Ok(None) => {
                    info!("Transcript input closed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to read from stdin");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    if let Some(status) = handle.status().await {
        info!(
            updates = status.successful_updates,
            pending = status.pending_fragments,
            "Stopping session"
        );
    }
    match handle.stop().await {
        Some(record) => {
            info!(session_id = %record.id, "Session complete");
            let state = record_structure(record.tree_structure, record.graph_structure);
            log_structure(&state);
            if let Some(view) = layout::layout(&state) {
                println!("{}", serde_json::to_string_pretty(&view)?);
            }
        }
        None => warn!("Scheduler exited before returning a final record"),
    }

    Ok(())
}
