use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use tenfold::config::{AppConfig, LogFormat};
use tenfold::onboarding::{
    OnboardingState, StateManager, StateRequirements, TransitionPayload, TransitionResponse,
};
use tenfold::store::LibSqlBackend;

#[derive(Parser)]
#[command(name = "tenfold")]
#[command(about = "Inspect and drive TenFold onboarding state", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the database and apply pending migrations
    Migrate,
    /// Show a user's current state (the visitor state when no id is given)
    State {
        /// External auth id
        auth_id: Option<String>,
    },
    /// List a user's state history, newest first
    History {
        auth_id: String,
        /// Maximum number of entries (defaults to TENFOLD_HISTORY_LIMIT)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Request a guarded state transition
    Transition {
        auth_id: String,
        /// Target state, e.g. PAYMENT
        target: String,
        /// New state metadata as a JSON object
        #[arg(long)]
        metadata: Option<String>,
        /// Extra top-level payload field; the value is parsed as JSON when possible
        #[arg(long = "field", value_parser = parse_field)]
        fields: Vec<(String, Value)>,
        #[arg(long, default_value = "Manual transition")]
        reason: String,
    },
    /// Show required fields and allowed transitions
    Requirements {
        /// A single state; all states when omitted
        state: Option<OnboardingState>,
    },
}

fn parse_field(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn init_tracing(config: &AppConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let (writer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "tenfold.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(writer);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(guard)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let _guard = init_tracing(&config)?;

    if let Commands::Requirements { state } = &cli.command {
        let requirements: Vec<StateRequirements> = match state {
            Some(state) => vec![StateRequirements::for_state(*state)],
            None => OnboardingState::ALL
                .into_iter()
                .map(StateRequirements::for_state)
                .collect(),
        };
        return print_json(&requirements);
    }

    let backend = LibSqlBackend::new_local(&config.db_path)
        .await
        .with_context(|| format!("opening database at {}", config.db_path.display()))?;
    let manager = StateManager::new(Arc::new(backend));

    match cli.command {
        Commands::Migrate => print_json(&serde_json::json!({
            "status": "ok",
            "db_path": config.db_path.display().to_string(),
        })),
        Commands::State { auth_id } => {
            print_json(&manager.get_current_state(auth_id.as_deref()).await)
        }
        Commands::History { auth_id, limit } => {
            let limit = limit.unwrap_or(config.history_limit);
            print_json(&manager.history(&auth_id, limit).await)
        }
        Commands::Transition {
            auth_id,
            target,
            metadata,
            fields,
            reason,
        } => {
            let metadata = match metadata {
                Some(raw) => serde_json::from_str(&raw).context("--metadata is not valid JSON")?,
                None => Value::Null,
            };
            let Some(mut payload) = TransitionPayload::from_metadata(metadata) else {
                bail!("--metadata must be a JSON object");
            };
            payload.fields.extend(fields);

            let result = manager
                .transition_user_state(&auth_id, &target, &payload, &reason)
                .await;
            print_json(&TransitionResponse::from(&result))?;
            if result.is_err() {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Requirements { .. } => Ok(()),
    }
}
