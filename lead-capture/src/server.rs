use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use common_redis::{Client as RedisClientTrait, RedisClient};
use limiters::{build_rate_limiter, InMemoryConfig};
use tokio::net::TcpListener;

use crate::client_ip::ClientIpPolicy;
use crate::config::Config;
use crate::crm::{CrmClient, DisabledCrm, GhlClient};
use crate::persistence::{get_pool, LeadStore, PgLeadStore};
use crate::pipeline::LeadPipeline;
use crate::recaptcha::RecaptchaVerifier;
use crate::router::{router, AppState};
use crate::webhook::WebhookNotifier;

async fn connect_redis(config: &Config) -> Option<Arc<dyn RedisClientTrait + Send + Sync>> {
    let url = config.redis_url.as_ref()?;
    let client = RedisClient::with_config(
        url.as_str().to_string(),
        Some(config.redis_response_timeout_ms.0),
        Some(config.redis_connection_timeout_ms.0),
    )
    .await;

    let checked = match client {
        Ok(client) => client.ping().await.map(|_| client),
        Err(e) => Err(e),
    };
    match checked {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::error!(error = %e, "failed to connect to redis, rate limiting in memory");
            None
        }
    }
}

async fn build_store(config: &Config) -> anyhow::Result<Option<Arc<dyn LeadStore>>> {
    let Some(url) = &config.database_url else {
        tracing::warn!("no DATABASE_URL configured, submissions will not be stored");
        return Ok(None);
    };

    let pool = get_pool(url.as_str(), config.max_pg_connections)
        .context("failed to create postgres pool")?;
    let store = PgLeadStore::new(pool);
    if config.run_migrations {
        store
            .run_migrations()
            .await
            .context("failed to run migrations")?;
        tracing::info!("migrations applied");
    }
    Ok(Some(Arc::new(store)))
}

/// Wires every collaborator from configuration. Optional integrations that
/// are not configured are skipped with a log line, never an error.
pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let crm: Arc<dyn CrmClient> = match GhlClient::from_config(&config.crm) {
        Some(client) => Arc::new(client.context("failed to build CRM client")?),
        None => {
            tracing::warn!("no GHL_API_KEY configured, CRM sync disabled");
            Arc::new(DisabledCrm)
        }
    };

    let webhook = match &config.webhook_url {
        Some(url) => {
            let notifier = WebhookNotifier::new(
                url.as_str(),
                config.webhook_secret.as_ref().map(|s| s.as_str()),
            )
            .context("failed to build webhook notifier")?;
            if !notifier.is_signed() {
                tracing::warn!("no WEBHOOK_SECRET configured, webhook requests are unsigned");
            }
            Some(Arc::new(notifier))
        }
        None => None,
    };

    let store = build_store(config).await?;

    let pipeline = LeadPipeline::new(crm, webhook, store, config.site_url.clone());

    let rate_limiter = build_rate_limiter(
        connect_redis(config).await,
        InMemoryConfig {
            max_entries: config.rate_limit_max_keys,
            ..InMemoryConfig::default()
        },
    );

    let bot_verifier = RecaptchaVerifier::new(
        config.recaptcha_secret_key.as_ref().map(|s| s.as_str()),
        &config.recaptcha_verify_url,
        config.environment,
    )
    .context("failed to build recaptcha client")?;

    Ok(AppState {
        pipeline: Arc::new(pipeline),
        rate_limiter,
        bot_verifier: Arc::new(bot_verifier),
        client_ip_policy: Arc::new(ClientIpPolicy::new(
            &config.trusted_ip_header,
            config.trusted_proxy,
        )),
    })
}

pub async fn serve<F>(config: Config, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = build_state(&config).await?;

    let metrics = if config.enable_metrics {
        Some(common_metrics::setup_metrics_recorder().context("failed to install metrics recorder")?)
    } else {
        None
    };
    let app = router(state, metrics);

    tracing::info!("listening on {:?}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}
