//! Entry point: parse the CLI, load config, boot the `ServiceManager`, and
//! serve the supplemented HTTP edge — reloading on `SIGHUP` the way
//! `bootstrap`'s process supervisor cycles a node through
//! Starting/Running/Draining on config change.

mod cli;
mod config;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use k256::pkcs8::DecodePrivateKey;
use k256::ecdsa::SigningKey;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;

use decryptor::Decryptor;
use http_edge::{AuthConfig, HttpEdgeService};
use livesync::LivesyncService;
use parsers::{FullTextParser, KvParser};
use service::{Service, ServiceManager};
use trace_client::{TraceClient, TraceClientConfig};

use cli::{Cli, Commands};
use config::Config;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = cli.command {
        cli::print_completions(shell);
        return Ok(());
    }

    connector_telemetry::init(cli.log.into());

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building the tokio runtime")?
        .block_on(run(cli))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut sighup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;

    loop {
        let config = config::load(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?;
        let manager = boot(config).await?;

        tokio::select! {
            _ = sighup.recv() => {
                info!("SIGHUP received, draining and reloading configuration");
                manager.shutdown().await.context("draining services for reload")?;
                continue;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                manager.shutdown().await.context("shutting down services")?;
                return Ok(());
            }
        }
    }
}

/// Boots identity, the trace client, every managed `Service`, and (if
/// configured) the HTTP edge, returning the running `ServiceManager`.
async fn boot(config: Config) -> anyhow::Result<ServiceManager> {
    let signing_pem = std::fs::read_to_string(&config.identity.signing_key_path)
        .with_context(|| format!("reading {}", config.identity.signing_key_path.display()))?;
    let signing_key = SigningKey::from_pkcs8_pem(&signing_pem)
        .context("parsing the node's ECDSA signing key")?;

    let decryption_pem = std::fs::read_to_string(&config.identity.decryption_key_path)
        .with_context(|| format!("reading {}", config.identity.decryption_key_path.display()))?;
    let decryptor =
        Arc::new(Decryptor::from_pem(&decryption_pem).context("parsing the node's RSA decryption key")?);

    let trace_config =
        TraceClientConfig::new(config.trace_client.trace_base, config.trace_client.account_base);
    let trace_client: Arc<dyn livesync::LinkSource> =
        Arc::new(TraceClient::new(trace_config, signing_key, decryptor)?);

    let mut services: Vec<Box<dyn Service>> = vec![
        Box::new(LivesyncService::new(trace_client)),
        Box::new(KvParser::new()),
        Box::new(FullTextParser::new()),
    ];

    if let Some(http_edge) = config.http_edge {
        let auth = AuthConfig {
            account_info_url: http_edge.account_info_url,
            allowed_accounts: http_edge.allowed_accounts.into_iter().collect(),
        };
        services.push(Box::new(HttpEdgeService::new(http_edge.bind, auth)));
    }

    let mut manager = ServiceManager::new();
    manager.boot(services, config.service_tables).await?;

    Ok(manager)
}
