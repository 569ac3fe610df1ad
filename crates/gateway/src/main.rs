use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig as _;

use sy_domain::config::{Config, LogFormat, ObservabilityConfig};
use sy_engine::Orchestrator;
use sy_gateway::bootstrap;
use sy_gateway::cli::{Cli, Command, ConfigCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = sy_gateway::cli::config_path();

    match cli.command {
        // Default to serve when no subcommand is given.
        None | Some(Command::Serve) => {
            let config = Config::load(std::path::Path::new(&config_path))
                .with_context(|| format!("loading {config_path}"))?;
            let tracer_provider = init_tracing(&config.observability);
            serve(&config_path, tracer_provider).await
        }
        Some(Command::Run {
            query,
            thread,
            org,
            json,
        }) => {
            init_cli_tracing();
            let orch = bootstrap::build_orchestrator(&config_path)?;
            sy_gateway::cli::run::run(orch, query, thread, org, json).await
        }
        Some(Command::Status { thread_id }) => {
            init_cli_tracing();
            let orch = bootstrap::build_orchestrator(&config_path)?;
            sy_gateway::cli::run::status(&orch, &thread_id)
        }
        Some(Command::Recover) => {
            init_cli_tracing();
            let orch = bootstrap::build_orchestrator(&config_path)?;
            sy_gateway::cli::run::recover(&orch).await
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            if !sy_gateway::cli::config::validate(&config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let config = Config::load(std::path::Path::new(&config_path))
                .with_context(|| format!("loading {config_path}"))?;
            sy_gateway::cli::config::show(&config)
        }
        Some(Command::Version) => {
            println!("switchyard {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Initialize structured tracing for the long-running `serve` command.
///
/// When `otlp_endpoint` is configured, an OpenTelemetry layer is added
/// so that every `tracing` span is also exported as an OTel span via
/// OTLP/gRPC.  The returned [`SdkTracerProvider`] handle must be shut
/// down on exit to flush pending spans.
///
/// [`SdkTracerProvider`]: opentelemetry_sdk::trace::SdkTracerProvider
fn init_tracing(
    obs: &ObservabilityConfig,
) -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&obs.log_filter));

    let fmt_layer = match obs.log_format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer().compact().boxed(),
    };

    let Some(endpoint) = &obs.otlp_endpoint else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
        return None;
    };

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(e) => e,
        Err(e) => {
            eprintln!(
                "WARNING: failed to create OTLP exporter for {endpoint}: {e}; \
                 starting without OpenTelemetry"
            );
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .init();
            return None;
        }
    };

    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name(obs.service_name.clone())
        .build();

    let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(
            obs.sample_rate,
        ))
        .with_resource(resource)
        .build();

    let otel_layer =
        tracing_opentelemetry::layer().with_tracer(tracer_provider.tracer("switchyard"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .init();

    Some(tracer_provider)
}

/// Initialize compact stderr-only tracing for one-shot commands.
///
/// Defaults to `warn` level so diagnostic output does not pollute stdout.
fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Run the orchestrator until SIGINT/SIGTERM.  SIGHUP reloads the config.
async fn serve(
    config_path: &str,
    tracer_provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
) -> anyhow::Result<()> {
    tracing::info!(config = %config_path, "Switchyard starting");

    let orch = bootstrap::build_orchestrator(config_path)?;
    let recovery = orch.spawn_recovery_loop();
    tracing::info!(
        interval_secs = orch.config().recovery.interval_secs,
        "recovery loop started"
    );

    wait_for_shutdown(&orch).await?;

    // ── Shutdown ────────────────────────────────────────────────────
    orch.shutdown();
    if let Err(e) = recovery.await {
        tracing::warn!(error = %e, "recovery loop did not stop cleanly");
    }

    if let Some(provider) = tracer_provider {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = ?e, "OpenTelemetry tracer provider shutdown failed");
        }
    }

    tracing::info!("shutdown complete");
    Ok(())
}

/// Block until a termination signal, reloading config on every SIGHUP.
async fn wait_for_shutdown(orch: &Arc<Orchestrator>) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
        let mut sighup = signal(SignalKind::hangup()).context("registering SIGHUP handler")?;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("received SIGINT, shutting down");
                    return Ok(());
                }
                _ = sigterm.recv() => {
                    tracing::info!("received SIGTERM, shutting down");
                    return Ok(());
                }
                _ = sighup.recv() => reload(orch),
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("waiting for Ctrl-C")?;
        tracing::info!("received SIGINT, shutting down");
        let _ = orch;
        Ok(())
    }
}

fn reload(orch: &Orchestrator) {
    match orch.reload_config() {
        Ok(warnings) => {
            for w in &warnings {
                tracing::warn!("config: {w}");
            }
            tracing::info!("config reloaded");
        }
        Err(e) => tracing::error!(error = %e, "config reload rejected, keeping previous config"),
    }
}
