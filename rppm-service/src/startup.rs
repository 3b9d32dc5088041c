//! Application startup and lifecycle management.
//!
//! Stores are chosen from configuration: Postgres when `DATABASE_URL` is set
//! (otherwise unconfigured mode), Redis counters when `REDIS_URL` is set
//! (otherwise process-local counters).

use crate::config::{ProviderKind, RppmConfig};
use crate::services::authenticator::WeakIdentityPolicy;
use crate::services::credentials::{CredentialStore, PgCredentialStore};
use crate::services::gate::{
    CounterStore, GateSettings, InMemoryCounterStore, OwnerBypass, RedisCounterStore,
};
use crate::services::providers::gemini::{GeminiConfig, GeminiProvider};
use crate::services::providers::mock::MockProvider;
use crate::services::providers::CompletionProvider;
use crate::services::usage::{InMemoryUsageStore, PgUsageStore, UsageCounterStore};
use crate::services::{
    AdmissionGate, Authenticator, Clock, CompletionInvoker, SystemClock, UsageRecorder,
};
use crate::{build_router, db, AppState};
use service_core::error::AppError;
use service_core::middleware::rate_limit::{create_ip_rate_limiter, IpRateLimit};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: RppmConfig) -> Result<Self, AppError> {
        let state = build_state(config.clone()).await?;

        // Port 0 = random port for testing
        let address = config.common.bind_address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", address, e);
            AppError::from(e)
        })?;
        let http_port = listener.local_addr()?.port();

        tracing::info!(
            port = http_port,
            mode = state.gate.mode().as_str(),
            "rppm-service listening"
        );

        Ok(Self {
            http_port,
            listener,
            state,
        })
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until SIGINT/SIGTERM.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let housekeeping = spawn_housekeeping(self.state.gate.clone());

        let router = build_router(self.state);
        let result = axum::serve(
            self.listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        housekeeping.abort();
        result
    }
}

/// Wire stores, gate, authenticator and provider from configuration.
pub async fn build_state(config: RppmConfig) -> Result<AppState, AppError> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let (credentials, usage_store): (Option<Arc<dyn CredentialStore>>, Arc<dyn UsageCounterStore>) =
        match &config.database {
            Some(database) => {
                let pool = db::connect(database).await.map_err(|e| {
                    tracing::error!(error = %e, "Database setup failed");
                    AppError::DatabaseError(anyhow::Error::new(e))
                })?;
                let credentials: Arc<dyn CredentialStore> =
                    Arc::new(PgCredentialStore::new(pool.clone()));
                let usage: Arc<dyn UsageCounterStore> = Arc::new(PgUsageStore::new(pool));
                (Some(credentials), usage)
            }
            None => {
                tracing::warn!(
                    "DATABASE_URL not set: access codes are accepted unverified and usage counters are kept in memory"
                );
                let usage: Arc<dyn UsageCounterStore> = Arc::new(InMemoryUsageStore::new());
                (None, usage)
            }
        };

    let weak_policy = if config.auth.allow_weak_device_ids {
        WeakIdentityPolicy::Accept
    } else {
        WeakIdentityPolicy::Reject
    };
    let authenticator = match &credentials {
        Some(store) => Authenticator::new(store.clone(), clock.clone()),
        None => Authenticator::unconfigured(clock.clone()),
    }
    .with_weak_identity_policy(weak_policy);

    let counters: Arc<dyn CounterStore> = match &config.redis {
        Some(redis) => Arc::new(RedisCounterStore::new(redis).await.map_err(|e| {
            tracing::error!("Failed to connect to Redis: {}", e);
            AppError::CacheError(e)
        })?),
        None => {
            tracing::info!("REDIS_URL not set, using process-local rate and quota counters");
            Arc::new(InMemoryCounterStore::new())
        }
    };

    let gate = AdmissionGate::new(
        GateSettings::from_config(&config),
        OwnerBypass::new(
            config.gate.owner_api_key.clone(),
            config.gate.owner_ips.iter().copied(),
        ),
        counters,
        clock,
    );

    let provider: Arc<dyn CompletionProvider> = match config.completion.provider {
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(GeminiConfig {
            api_key: config.completion.api_key.clone(),
            base_url: config.completion.base_url.clone(),
        })?),
        ProviderKind::Mock => {
            tracing::warn!("Using the mock completion provider");
            Arc::new(MockProvider::new())
        }
    };
    let invoker = CompletionInvoker::new(
        provider,
        config.completion.primary_model.clone(),
        config.completion.fallback_model.clone(),
    );

    tracing::info!(
        primary = %config.completion.primary_model,
        fallback = ?config.completion.fallback_model,
        "Initialized completion invoker"
    );

    let auth_rate_limit = IpRateLimit::new(
        create_ip_rate_limiter(config.auth.attempts_per_minute, 60),
        config.gate.trust_proxy_headers,
    );

    Ok(AppState {
        config,
        authenticator: Arc::new(authenticator),
        gate: Arc::new(gate),
        invoker,
        usage: UsageRecorder::new(usage_store),
        credentials,
        auth_rate_limit,
    })
}

fn spawn_housekeeping(gate: Arc<AdmissionGate>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            gate.prune().await;
        }
    })
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
