use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use triage_core::events::TriageEvent;
use triage_core::provider::{LlmProvider, StreamOptions};
use triage_core::triage::{TriageInput, TriageOutcome};
use triage_engine::TriageAnalyzer;
use triage_llm::{KeywordProvider, OpenAiConfig, OpenAiProvider, ReliableConfig, ReliableProvider};
use triage_settings::{load_settings, load_settings_from_path, triage_home, ProviderKind, TriageSettings};
use triage_store::{spawn_log_writer, ClientStore, Database, FieldCipher, TriageLogRepo};
use triage_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "triage", about = "Medical referral triage")]
struct Cli {
    /// Settings file (defaults to ~/.triage/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Triage a referral given as one text file per page.
    Analyze {
        #[arg(long)]
        client: String,
        /// Client config file, overriding the settings value.
        #[arg(long)]
        clients: Option<PathBuf>,
        #[arg(required = true)]
        pages: Vec<PathBuf>,
    },
    /// List configured clients and their enabled tools.
    Clients {
        #[arg(long)]
        clients: Option<PathBuf>,
    },
    /// Show recent analyses from the encrypted log.
    Logs {
        #[arg(long, default_value_t = 10)]
        limit: u32,
        /// Print aggregate statistics instead of records.
        #[arg(long, conflicts_with = "id")]
        stats: bool,
        /// Print the single record with this id.
        #[arg(long)]
        id: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match cli.settings.as_deref() {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    };
    let settings = match settings {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: failed to load settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    let _ = init_telemetry(&TelemetryConfig::from_levels(
        &settings.logging.level,
        &settings.logging.modules,
        settings.logging.json,
    ));

    let result = match cli.command {
        Command::Analyze { client, clients, pages } => {
            analyze(&settings, &client, clients.as_deref(), &pages).await
        }
        Command::Clients { clients } => list_clients(&settings, clients.as_deref()),
        Command::Logs { limit, stats, id } => show_logs(&settings, limit, stats, id),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn analyze(
    settings: &TriageSettings,
    client_id: &str,
    clients_path: Option<&Path>,
    page_files: &[PathBuf],
) -> Result<ExitCode> {
    let store = open_clients(settings, clients_path)?;
    let Some(client) = store.get_client(client_id) else {
        bail!("unknown client '{client_id}'");
    };
    if !client.active {
        tracing::warn!(client_id, "client is marked inactive");
    }

    let mut pages = Vec::with_capacity(page_files.len());
    for path in page_files {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading referral page {}", path.display()))?;
        pages.push(text);
    }

    let provider = build_provider(settings)?;
    let (event_tx, _) = broadcast::channel::<TriageEvent>(64);

    let writer = if settings.store.log_enabled {
        let repo = open_log_repo(settings)?;
        Some(spawn_log_writer(repo, event_tx.subscribe()))
    } else {
        None
    };

    let analyzer = TriageAnalyzer::new(provider, event_tx)
        .with_timeout(Duration::from_millis(settings.llm.timeout_ms))
        .with_max_tool_rounds(settings.llm.max_tool_rounds)
        .with_stream_options(StreamOptions {
            max_tokens: settings.llm.max_tokens,
            temperature: settings.llm.temperature,
            stop_sequences: Vec::new(),
        });

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let input = TriageInput::new(client_id, pages);
    let outcome = analyzer
        .analyze_outcome(&input, &client.rule_set(), &cancel)
        .await;

    // Closing the channel lets the writer drain and exit.
    drop(analyzer);
    if let Some(writer) = writer {
        if let Err(e) = writer.await {
            tracing::warn!(error = %e, "triage log writer did not finish cleanly");
        }
    }

    match outcome {
        TriageOutcome::Completed(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(ExitCode::SUCCESS)
        }
        failed @ TriageOutcome::Failed(_) => {
            println!("{}", serde_json::to_string_pretty(&failed)?);
            Ok(ExitCode::from(2))
        }
    }
}

fn list_clients(settings: &TriageSettings, clients_path: Option<&Path>) -> Result<ExitCode> {
    let config = open_clients(settings, clients_path)?.snapshot();
    for client in &config.clients {
        let tools: Vec<&str> = client
            .tools
            .iter()
            .filter(|t| t.enabled)
            .map(|t| t.name.as_str())
            .collect();
        let mapped = config.urgency_mapping(&client.id).map_or(0, |m| m.len());
        println!(
            "{}\t{}\t{}\tspecialties={}\ttools=[{}]",
            client.id,
            client.name,
            if client.active { "active" } else { "inactive" },
            mapped,
            tools.join(", ")
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn show_logs(settings: &TriageSettings, limit: u32, stats: bool, id: Option<i64>) -> Result<ExitCode> {
    let repo = open_log_repo(settings)?;
    if let Some(id) = id {
        let Some(log) = repo.get_decrypted(id)? else {
            bail!("no triage log with id {id}");
        };
        println!("{}", serde_json::to_string_pretty(&log)?);
        return Ok(ExitCode::SUCCESS);
    }
    if stats {
        let stats = repo.stats(None)?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        println!("success rate: {:.1}%", stats.success_rate());
        return Ok(ExitCode::SUCCESS);
    }
    for log in repo.recent(limit)? {
        println!("{}", serde_json::to_string(&log)?);
    }
    Ok(ExitCode::SUCCESS)
}

fn open_clients(settings: &TriageSettings, override_path: Option<&Path>) -> Result<ClientStore> {
    let path = override_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(&settings.store.clients_path));
    ClientStore::load(&path).with_context(|| format!("loading clients from {}", path.display()))
}

fn open_log_repo(settings: &TriageSettings) -> Result<TriageLogRepo> {
    let home = triage_home();
    let db_path = settings.store.resolved_log_db_path(&home);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let db = Database::open(&db_path)?;
    let key_path = settings.store.resolved_key_path(&home);
    let cipher = FieldCipher::from_key_file(&key_path)
        .with_context(|| format!("loading encryption key {}", key_path.display()))?;
    tracing::debug!(path = %db_path.display(), "triage log opened");
    Ok(TriageLogRepo::new(db, cipher))
}

fn build_provider(settings: &TriageSettings) -> Result<Arc<dyn LlmProvider>> {
    let llm = &settings.llm;
    match llm.provider {
        ProviderKind::Mock => {
            tracing::info!("using offline keyword provider");
            Ok(Arc::new(KeywordProvider::new()))
        }
        ProviderKind::OpenAi => {
            let api_key = std::env::var(&llm.api_key_env).ok();
            let config = OpenAiConfig::resolve(
                &llm.base_url,
                &llm.model,
                api_key,
                Duration::from_millis(llm.timeout_ms),
            )
            .with_context(|| format!("no usable LLM configuration (set {})", llm.api_key_env))?;
            tracing::info!(
                model = %config.model,
                endpoint = %config.base_url,
                local = config.is_local(),
                "initialized LLM provider"
            );
            let retry = &settings.retry;
            let provider = ReliableProvider::new(
                OpenAiProvider::new(config)?,
                ReliableConfig::from_millis(
                    retry.max_retries,
                    retry.base_delay_ms,
                    retry.max_delay_ms,
                    retry.circuit_breaker_threshold,
                    retry.circuit_breaker_cooldown_ms,
                ),
            );
            Ok(Arc::new(provider))
        }
    }
}
