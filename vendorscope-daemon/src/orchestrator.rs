//! Daemon orchestration -- assembly and the host message loop.
//!
//! The [`Orchestrator`] loads configuration, opens the state directory,
//! assembles the [`Router`] and runs [`serve`] over stdin/stdout until the
//! host closes its end of the pipe or a shutdown signal arrives.
//!
//! # Event loop
//!
//! A single task selects over four sources:
//!
//! 1. Shutdown signal (SIGTERM or SIGINT)
//! 2. Request lines from the host
//! 3. Capture expiry timers
//! 4. Debounced analysis timers
//!
//! After each step, host events queued by the session layer are written
//! out as NDJSON lines.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use vendorscope_core::config::VendorscopeConfig;
use vendorscope_core::metrics as m;
use vendorscope_core::store::{FileStateStore, StateStore};
use vendorscope_detector::{DetectorConfig, FileRuleSource, RuleSource};

use crate::protocol::{encode_event, encode_response, parse_line};
use crate::router::{Router, RouterChannels};

/// Counters reported when [`serve`] returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServeSummary {
    /// Request lines answered (including malformed ones).
    pub requests: u64,
    /// Host events written.
    pub events: u64,
}

/// Run the host message loop until input ends or `shutdown` resolves.
///
/// Pending timers are cancelled before returning, and any events they
/// produced up to that point are flushed.
///
/// # Errors
///
/// Returns an error if reading input or writing output fails.
pub async fn serve<R, S, I, O, F>(
    router: &mut Router<R, S>,
    channels: &mut RouterChannels,
    input: I,
    mut output: O,
    shutdown: F,
) -> Result<ServeSummary>
where
    R: RuleSource,
    S: StateStore,
    I: AsyncBufRead + Unpin,
    O: AsyncWrite + Unpin,
    F: Future<Output = ()>,
{
    let mut lines = input.lines();
    let mut summary = ServeSummary::default();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;
            () = &mut shutdown => {
                tracing::info!("shutdown requested, leaving message loop");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    tracing::info!("host closed input");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let response = match parse_line(line) {
                    Ok(envelope) => router.handle(envelope).await,
                    Err(response) => {
                        tracing::warn!(
                            id = response.id,
                            error = response.error.as_deref().unwrap_or_default(),
                            "malformed request"
                        );
                        metrics::counter!(m::DAEMON_MALFORMED_REQUESTS_TOTAL).increment(1);
                        response
                    }
                };
                write_line(&mut output, &encode_response(&response)).await?;
                summary.requests += 1;
            }
            Some(timer) = channels.timers.recv() => {
                router.handle_timer(timer).await;
            }
            Some(timer) = channels.debounced.recv() => {
                router.handle_debounced(timer).await;
            }
        }
        summary.events += drain_events(channels, &mut output).await?;
        output.flush().await?;
    }

    router.shutdown();
    summary.events += drain_events(channels, &mut output).await?;
    output.flush().await?;
    Ok(summary)
}

async fn drain_events<O: AsyncWrite + Unpin>(
    channels: &mut RouterChannels,
    output: &mut O,
) -> Result<u64> {
    let mut written = 0;
    while let Ok(event) = channels.events.try_recv() {
        let Some(line) = encode_event(&event) else {
            tracing::warn!(event_type = event.event_type(), "failed to encode host event");
            continue;
        };
        write_line(output, &line).await?;
        written += 1;
    }
    Ok(written)
}

async fn write_line<O: AsyncWrite + Unpin>(output: &mut O, line: &str) -> Result<()> {
    output.write_all(line.as_bytes()).await?;
    output.write_all(b"\n").await?;
    Ok(())
}

/// The main daemon orchestrator.
pub struct Orchestrator {
    config: VendorscopeConfig,
    router: Router<FileRuleSource, FileStateStore>,
    channels: RouterChannels,
}

impl Orchestrator {
    /// Load configuration from a file and build the orchestrator.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be loaded or
    /// validated, or the state directory cannot be opened.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = VendorscopeConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build the orchestrator from an already-loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails or the state directory
    /// cannot be opened.
    pub async fn build_from_config(config: VendorscopeConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

        let state = Arc::new(
            FileStateStore::open(&config.general.data_dir)
                .await
                .map_err(|e| anyhow::anyhow!("failed to open state directory: {}", e))?,
        );
        let source = FileRuleSource::from_config(&DetectorConfig::from_core(&config.rules));
        let (router, channels) = Router::assemble(source, state, &config)
            .map_err(|e| anyhow::anyhow!("failed to assemble router: {}", e))?;

        tracing::info!(
            data_dir = %config.general.data_dir,
            catalog = %config.rules.catalog_path,
            persist = config.session.persist,
            "orchestrator initialized"
        );
        Ok(Self {
            config,
            router,
            channels,
        })
    }

    /// Serve stdin/stdout until the host disconnects or a signal arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if signal handlers cannot be installed or host I/O
    /// fails.
    pub async fn run(mut self) -> Result<()> {
        self.router.warm_up().await;

        let shutdown = shutdown_signal()?;
        let input = tokio::io::BufReader::new(tokio::io::stdin());
        let output = tokio::io::stdout();

        tracing::info!("entering host message loop");
        let summary = serve(
            &mut self.router,
            &mut self.channels,
            input,
            output,
            shutdown,
        )
        .await?;
        tracing::info!(
            requests = summary.requests,
            events = summary.events,
            "vendorscope-daemon stopped"
        );
        Ok(())
    }

    /// Returns a reference to the loaded configuration.
    pub fn config(&self) -> &VendorscopeConfig {
        &self.config
    }
}

/// Install SIGTERM/SIGINT handlers and return a future resolving on either.
///
/// # Errors
///
/// Returns an error if signal handlers cannot be installed.
fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(async move {
        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        tracing::info!(signal = name, "shutdown signal received");
    })
}
