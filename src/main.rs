//! AutoMed Dashboard - headless console
//!
//! Runs a sync session against the AutoMed simulation service and logs what
//! the dashboard would show: reachability, push channel state, the
//! simulation roster and operator notifications.

use std::rc::Rc;

use anyhow::{Context, Result};
use automed_client::{ApiClient, SimulationApi, SyncConfig, SyncSession, WsConnector};
use serde_json::json;
use tokio::task::LocalSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "automed_dashboard=info,automed_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = SyncConfig::from_env().context("invalid configuration")?;

    // The session is single-threaded: everything runs on one LocalSet.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")?;
    LocalSet::new().block_on(&runtime, run(config))
}

async fn run(config: SyncConfig) -> Result<()> {
    let api = Rc::new(
        ApiClient::new()
            .with_base_url(config.api_url.clone())
            .with_timeout(config.request_timeout),
    );
    if config.push_url.is_none() {
        tracing::info!("push channel disabled; polling only");
    }
    let session = SyncSession::new(config, api.clone(), Rc::new(WsConnector));

    let mut connected = session.watch_connected();
    let mut connection = session.watch_connection();
    let mut revision = session.watch_revision();
    let mut notifications = session.notifier().watch();
    let mut server_info = session.watch_server_info();
    session.on_push_message(|payload| tracing::debug!("push message: {payload}"));

    session.start();

    tokio::task::spawn_local(async move {
        match api.echo(&json!({ "message": "dashboard online" })).await {
            Ok(echo) => tracing::info!("echo round-trip ok: {}", echo.received),
            Err(e) => tracing::warn!("echo failed: {e}"),
        }
    });

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("failed to listen for ctrl-c")?;
                tracing::info!("shutting down");
                break;
            }
            Ok(()) = connected.changed() => {
                if *connected.borrow_and_update() {
                    tracing::info!("AutoMed service is reachable");
                } else {
                    tracing::warn!("AutoMed service is not reachable");
                }
            }
            Ok(()) = connection.changed() => {
                let state = *connection.borrow_and_update();
                tracing::info!("push channel: {state:?}");
            }
            Ok(()) = server_info.changed() => {
                if let Some(info) = server_info.borrow_and_update().clone() {
                    tracing::info!("server: {} {} ({})", info.name, info.version, info.kind);
                }
            }
            Ok(()) = revision.changed() => {
                revision.borrow_and_update();
                log_roster(&session);
            }
            Ok(()) = notifications.changed() => {
                if let Some(notification) = notifications.borrow_and_update().clone() {
                    let at = notification.created_at.with_timezone(&chrono::Local);
                    tracing::info!(
                        "[{}] {:?}: {}",
                        at.format("%H:%M:%S"),
                        notification.kind,
                        notification.message
                    );
                }
            }
        }
    }

    session.shutdown();
    Ok(())
}

fn log_roster(session: &SyncSession) {
    let roster = session.roster();
    if roster.is_empty() {
        tracing::info!("no simulations");
        return;
    }
    for id in roster {
        match session.snapshot(id).and_then(|snapshot| snapshot.status) {
            Some(status) => tracing::info!(
                "#{id} {} {:?} {:.0}% ({} treated, {} waiting)",
                status.nom,
                status.etat,
                status.progression,
                status.nombre_patients_traites,
                status.nombre_patients_en_attente
            ),
            None => tracing::info!("#{id} (no status yet)"),
        }
    }
}
