use actix_web::{web, App, HttpServer};
use async_trait::async_trait;
use fix_replicator::api;
use fix_replicator::cache::ReferenceCache;
use fix_replicator::config::Settings;
use fix_replicator::context::ExecutionContext;
use fix_replicator::dispatcher::Dispatcher;
use fix_replicator::engine::locate::LocateEngine;
use fix_replicator::engine::monitor::LocateMonitor;
use fix_replicator::engine::replication::ReplicationEngine;
use fix_replicator::fix::message::{OutboundMessage, SessionRole};
use fix_replicator::fix::session::{FixSessionRegistry, FixSessionSender, PausedState, SessionSendError};
use fix_replicator::model::{Account, Broker, CopyRule, Route};
use fix_replicator::router::SessionRouter;
use fix_replicator::store::event_store::EventStore;
use fix_replicator::store::redb_store::RedbStore;
use fix_replicator::store::wal::WalManager;
use serde::Deserialize;
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Logs every outbound FIX message instead of sending it. Framing,
/// sequencing and the actual socket are owned by the transport (spec
/// §1/§5); this is the stand-in used until a real `FixSessionSender` is
/// wired in by the deployment.
struct LoggingFixSessionSender;

#[async_trait]
impl FixSessionSender for LoggingFixSessionSender {
    async fn send(&self, session_id: &str, message: OutboundMessage) -> Result<(), SessionSendError> {
        info!(session_id = %session_id, message = ?message, "outbound message (no transport wired, logged only)");
        Ok(())
    }
}

/// Optional seed for the Reference Cache (spec §4.9). Administrative
/// reference-data storage is out of core scope; this lets an operator
/// hand the engine a snapshot as JSON at startup.
#[derive(Debug, Deserialize, Default)]
struct ReferenceDataSeed {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    brokers: Vec<Broker>,
    #[serde(default)]
    routes: Vec<Route>,
    #[serde(default)]
    copy_rules: Vec<CopyRule>,
}

fn load_reference_cache() -> ReferenceCache {
    let path = env::var("REFERENCE_DATA_PATH").unwrap_or_else(|_| "config/reference_data.json".to_string());
    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<ReferenceDataSeed>(&contents) {
            Ok(seed) => ReferenceCache::new(seed.accounts, seed.brokers, seed.routes, seed.copy_rules),
            Err(err) => {
                warn!(path = %path, error = %err, "failed to parse reference data seed, starting with an empty cache");
                ReferenceCache::empty()
            }
        },
        Err(_) => {
            warn!(path = %path, "no reference data seed found, starting with an empty cache");
            ReferenceCache::empty()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().json().with_target(false))
        .init();

    info!("fix-replicator starting");

    let settings = Settings::new().expect("failed to load configuration");

    let ctx = ExecutionContext::new_system();

    let persistence_path = env::var("PERSISTENCE_PATH").unwrap_or_else(|_| "fix_replicator.redb".to_string());
    let redb = Arc::new(RedbStore::new(&persistence_path).expect("failed to open redb store"));
    let wal = Arc::new(WalManager::new(redb.clone()));
    wal.initialize().expect("failed to initialize WAL tables");
    let store = Arc::new(EventStore::new(redb, wal));
    store.initialize().expect("failed to initialize event store tables");

    let cache = Arc::new(load_reference_cache());

    let sender: Arc<dyn FixSessionSender> = Arc::new(LoggingFixSessionSender);

    let locate = Arc::new(LocateEngine::new(cache.clone(), store.clone(), sender.clone(), ctx.clone()));
    let replication = Arc::new(ReplicationEngine::new(cache.clone(), store.clone(), sender, locate.clone(), ctx.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        cache.clone(),
        store.clone(),
        replication,
        locate.clone(),
        ctx.clone(),
        settings.worker_pool_size,
    ));

    let registry = Arc::new(FixSessionRegistry::new());
    registry.register(settings.primary_session.clone(), SessionRole::OrderEntry);
    if let Some(drop_copy) = settings.drop_copy_session_sender_comp_id.clone() {
        registry.register(drop_copy, SessionRole::DropCopy);
    }
    for shadow_session in &settings.shadow_sessions {
        registry.register(shadow_session.clone(), SessionRole::OrderEntry);
    }

    let paused = Arc::new(PausedState::new());
    let router = Arc::new(SessionRouter::new(
        registry,
        paused,
        dispatcher,
        ctx.clone(),
        settings.pause_resume_seconds,
    ));

    let monitor = Arc::new(LocateMonitor::new(store, locate, ctx, settings.locate_timeout_seconds));
    let monitor_for_spawn = monitor.clone();
    tokio::spawn(async move {
        monitor_for_spawn.run().await;
    });
    info!("locate timeout monitor running");

    let bind_address = format!("0.0.0.0:{}", env::var("PORT").unwrap_or_else(|_| "8080".to_string()));
    info!(bind_address = %bind_address, "starting observability HTTP surface");

    let router_for_api = router.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(router_for_api.clone()))
            .configure(api::config)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    Ok(())
}
