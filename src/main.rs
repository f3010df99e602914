#![forbid(unsafe_code)]

//! `action-relay` — streams one LLM generation from stdin into the sandbox.
//!
//! Bootstraps configuration and the audit backend, connects the relay
//! driver, and runs a single [`GenerationSession`] over the lines read from
//! standard input.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use action_relay::audit::{AuditLog, JsonlAuditWriter};
use action_relay::config::{AuditBackend, AuditConfig};
use action_relay::dispatch::handlers::{
    standard_registry, EventForwarder, GenerationEvent, HandlerDeps,
};
use action_relay::dispatch::DispatchContext;
use action_relay::grammar::TagFamily;
use action_relay::persistence::audit_repo::AuditRepo;
use action_relay::persistence::db;
use action_relay::relay::RelayChannel;
use action_relay::session::{GenerationOutcome, GenerationSession};
use action_relay::{AppError, GlobalConfig, Result};

/// Time the relay driver gets to flush queued messages after the session ends.
const FLUSH_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum Family {
    Project,
    Schema,
}

impl From<Family> for TagFamily {
    fn from(family: Family) -> Self {
        match family {
            Family::Project => Self::Project,
            Family::Schema => Self::Schema,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "action-relay", about = "LLM action block relay", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Project the generation writes into.
    #[arg(long)]
    project_id: String,

    /// Project type; selects the sandbox root directory.
    #[arg(long)]
    project_type: String,

    /// Prompt identifier; a random one is generated when omitted.
    #[arg(long)]
    prompt_id: Option<String>,

    /// Tag family to extract from the stream.
    #[arg(long, value_enum, default_value_t = Family::Project)]
    family: Family,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("action-relay bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = GlobalConfig::load_from_path(&args.config)?;
    info!("configuration loaded");

    // ── Audit backend ───────────────────────────────────
    let audit = open_audit(&config.audit).await?;

    // ── Relay ───────────────────────────────────────────
    let ct = CancellationToken::new();
    let (relay, driver, mut unsolicited) = RelayChannel::new(&config.relay);
    let mut relay_handle = tokio::spawn(driver.run_tcp(config.relay.address.clone(), ct.clone()));

    let listener_handle = tokio::spawn(async move {
        while let Some(envelope) = unsolicited.recv().await {
            info!(
                event = %envelope.event,
                data = %envelope.data,
                "relay listener: unsolicited message"
            );
        }
    });

    // ── Generation events ───────────────────────────────
    let (event_tx, mut event_rx) = mpsc::channel(64);
    let events_handle = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            print_event(&event);
        }
    });

    // ── Handlers and session ────────────────────────────
    let forwarder = Arc::new(EventForwarder::new(event_tx));
    let registry = Arc::new(standard_registry(&HandlerDeps {
        relay: Arc::new(relay.clone()),
        audit,
        schema: Arc::clone(&forwarder) as _,
        notifier: forwarder,
        sandbox: Arc::new(config.sandbox.clone()),
    }));

    let prompt_id = args
        .prompt_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let ctx = DispatchContext::new(args.project_id, prompt_id, args.project_type);
    let session = GenerationSession::new(
        ctx,
        args.family.into(),
        &config.extractor,
        registry,
        relay,
    )?;

    let result = drive(session).await;

    // ── Shutdown ────────────────────────────────────────
    // Every channel handle is gone once the session is, so the driver exits
    // on its own after draining the outbound queue.
    if tokio::time::timeout(FLUSH_GRACE, &mut relay_handle)
        .await
        .is_err()
    {
        warn!("relay driver did not drain in time; cancelling");
        ct.cancel();
        let _ = relay_handle.await;
    }
    let _ = tokio::join!(listener_handle, events_handle);

    match result {
        Ok(Some(outcome)) => {
            print_outcome(&outcome);
            info!("action-relay shut down");
            Ok(())
        }
        Ok(None) => {
            info!("action-relay shut down after abort");
            Ok(())
        }
        Err(err) => {
            error!(%err, "generation failed");
            Err(err)
        }
    }
}

/// Feed stdin through `session` until EOF, an error, or a shutdown signal.
///
/// Returns `Ok(None)` when the generation was aborted.
async fn drive(mut session: GenerationSession) -> Result<Option<GenerationOutcome>> {
    session.start()?;

    let mut lines = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let abort_reason = loop {
        tokio::select! {
            () = &mut shutdown => break Some("shutdown signal received".to_owned()),
            line = lines.next() => match line {
                None => break None,
                Some(Ok(line)) => {
                    if let Err(err) = session.feed(&format!("{line}\n")).await {
                        break Some(err.to_string());
                    }
                }
                Some(Err(err)) => break Some(format!("failed to read stdin: {err}")),
            },
        }
    };

    if let Some(reason) = abort_reason {
        session.abort(&reason);
        return Ok(None);
    }

    debug!("stdin closed; finishing generation");
    session.finish().await.map(Some)
}

async fn open_audit(config: &AuditConfig) -> Result<Arc<dyn AuditLog>> {
    match config.backend {
        AuditBackend::Sqlite => {
            let pool = db::connect(&config.path).await?;
            info!(path = %config.path.display(), "audit database connected");
            Ok(Arc::new(AuditRepo::new(Arc::new(pool))))
        }
        AuditBackend::Jsonl => {
            let writer = JsonlAuditWriter::open(config.path.clone()).await?;
            info!(dir = %config.path.display(), "audit log directory ready");
            Ok(Arc::new(writer))
        }
    }
}

fn print_event(event: &GenerationEvent) {
    match event {
        GenerationEvent::SchemaUpdated {
            prompt_id,
            definition,
        } => println!("[{prompt_id}] schema:\n{definition}"),
        GenerationEvent::SummaryReady { prompt_id, text } => {
            println!("[{prompt_id}] summary:\n{text}");
        }
    }
}

fn print_outcome(outcome: &GenerationOutcome) {
    println!(
        "dispatched={} failed={} unhandled={}",
        outcome.dispatched, outcome.failed, outcome.unhandled
    );
    if let Some(diff) = &outcome.diff {
        println!("{diff}");
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
