use tokio::sync::oneshot;
use mdns_sd::ServiceDaemon;
use anyhow::{Context, Result};
use nsd_discovery::config::Config;
use nsd_discovery::{Discoverer, MdnsBackend};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("nsd_discovery=info"))
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let config = Config::load(&path)
                .with_context(|| format!("Failed to load config from {}", path))?;
            tracing::info!("Loaded config from {}", path);
            config
        }
        None => Config::default(),
    };

    let daemon = ServiceDaemon::new()
        .context("Failed to create mDNS daemon")?;
    if let Some(interface) = &config.mdns.interface {
        daemon
            .disable_interface(mdns_sd::IfKind::All)
            .context("Failed to disable default interfaces")?;
        daemon
            .enable_interface(interface.as_str())
            .with_context(|| format!("Failed to enable interface {}", interface))?;
    }

    let backend = MdnsBackend::new(daemon.clone(), config.mdns.resolve_timeout());
    let discoverer = Discoverer::new(backend, config.discovery.browse_timeout());

    let (tx, mut rx) = oneshot::channel();
    let handle = discoverer.discover(
        &config.discovery.service_type,
        config.discovery.task_timeout(),
        move |report| {
            let _ = tx.send(report);
        },
    )?;

    let report = tokio::select! {
        report = &mut rx => report.context("Discovery ended without a report")?,
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for ctrl-c")?;
            tracing::info!("Interrupted, finishing with what has been resolved");
            handle.cancel();
            rx.await.context("Discovery ended without a report")?
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Err(e) = daemon.shutdown() {
        tracing::error!("Failed to shutdown mDNS daemon: {}", e);
    }

    Ok(())
}
