// SPDX-License-Identifier: Apache-2.0
use actix_web::{App, HttpServer, web};
use anyhow::Context;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;

use secretgate::config::{GateConfig, StoreBackend};
use secretgate::engine::AccessEngine;
use secretgate::logging::{self, LogFormat};
use secretgate::memory_session_store::MemorySessionStore;
use secretgate::middleware::AccessGate;
use secretgate::proxy;
use secretgate::redis_session_store::RedisSessionStore;
use secretgate::registry::Registry;
use secretgate::session_store::{SessionStore, StoreClient};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    logging::init("secretgate", LogFormat::from_env()).context("Failed to set tracing subscriber")?;

    let config = GateConfig::from_env().inspect_err(|e| error!(error = %e, "Invalid configuration"))?;

    let store: Arc<dyn SessionStore> = match &config.store.backend {
        StoreBackend::Redis { url } => Arc::new(
            RedisSessionStore::connect(url)
                .await
                .inspect_err(|e| error!(error = %e, "Failed to connect to Redis"))
                .context("Failed to connect to Redis")?,
        ),
        StoreBackend::Memory => {
            warn!("Using in-memory session store; sessions are not shared between instances");
            Arc::new(MemorySessionStore::new())
        }
    };

    let registry = Arc::new(Registry::new(config.applications.iter().cloned()));

    info!("Multi-app proxy started:");
    info!("  Listening on: {}", config.listen_address);
    info!("  Session store timeout: {:?}, retries: {}", config.store.timeout, config.store.retries);
    info!("  Configured apps: {}", registry.len());
    for app in registry.iter() {
        info!(
            "    {} -> {} (secret: {}, ttl: {:?}, auto_renew: {}, allow patterns: {})",
            app.hostname,
            app.upstream,
            app.secret_path_prefix,
            app.session_ttl,
            app.auto_renew,
            app.allow_list.len()
        );
    }

    let engine = AccessEngine::new(
        registry,
        StoreClient::new(store, config.store.timeout, config.store.retries),
        config.store.key_scope,
    );
    let upstream_timeout = config.upstream_timeout;

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(AccessGate::new(engine.clone()))
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(proxy::build_client(upstream_timeout)))
            .default_service(web::to(proxy::forward))
    })
    .bind(&config.listen_address)
    .with_context(|| format!("Failed to bind {}", config.listen_address))?;

    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }

    server.run().await?;
    Ok(())
}
