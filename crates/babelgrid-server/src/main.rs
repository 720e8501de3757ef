use anyhow::Context;
use babelgrid_cluster::{PoolConfig, WorkerPool};
use babelgrid_keyring::{Keyring, KeyringConfig, RateLimits};
use babelgrid_provider::{PromptCatalog, RestBackend, Translator, TranslatorConfig};
use babelgrid_server::{router, AppState, ObserverConfig, ResultObserver, Settings, UploadLimits};
use babelgrid_store::{RedisStore, Store};
use babelgrid_tasks::{spawn_reclaimer, TaskConfig, TaskManager};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let settings = Settings::parse();

    let store: Arc<dyn Store> = Arc::new(
        RedisStore::connect(&settings.redis_url)
            .await
            .with_context(|| format!("connecting to coordination store at {}", settings.redis_url))?,
    );

    let keyring = Arc::new(
        Keyring::from_file(
            Arc::clone(&store),
            &settings.api_keys_file,
            KeyringConfig::builder()
                .default_limits(RateLimits {
                    requests_per_minute: settings.default_rpm,
                    requests_per_day: settings.default_rpd,
                    tokens_per_minute: settings.default_tpm,
                })
                .build(),
        )
        .context("loading API credentials")?,
    );
    let prompts =
        Arc::new(PromptCatalog::from_file(&settings.prompts_file).context("loading prompts")?);
    let backend = Arc::new(RestBackend::new(
        &settings.provider_endpoint,
        &settings.provider_model,
    ));
    let translator = Arc::new(Translator::new(
        Arc::clone(&keyring),
        backend,
        prompts,
        TranslatorConfig::default(),
    ));

    let tasks = Arc::new(TaskManager::new(
        Arc::clone(&store),
        TaskConfig::builder()
            .retention(Duration::from_secs(settings.task_retention_s))
            .max_processing_time(Duration::from_secs(settings.max_processing_time_s))
            .build(),
    ));

    let pool = WorkerPool::new(
        Arc::clone(&store),
        Arc::clone(&tasks),
        translator,
        Arc::clone(&keyring),
        PoolConfig::builder()
            .min_workers(settings.min_workers)
            .max_workers(settings.max_workers)
            .scale_check_interval(Duration::from_secs(settings.scale_check_interval_s))
            .build(),
    );
    pool.start().await;

    let (reclaimer_shutdown, reclaimer_rx) = watch::channel(false);
    let reclaimer = spawn_reclaimer(Arc::clone(&tasks), reclaimer_rx);

    let observer = Arc::new(ResultObserver::new(
        Arc::clone(&tasks),
        ObserverConfig {
            poll_interval: Duration::from_millis(settings.polling_check_interval_ms),
            max_timeout: Duration::from_secs(settings.polling_timeout_s),
        },
    ));

    let state = AppState {
        store,
        tasks,
        keyring,
        pool: Arc::clone(&pool),
        observer,
        limits: UploadLimits {
            max_upload_size: settings.max_upload_size,
            ..UploadLimits::default()
        },
    };
    let app = router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(settings.listen)
        .await
        .with_context(|| format!("binding {}", settings.listen))?;
    tracing::info!(addr = %settings.listen, instance_id = %pool.instance_id(), "babelgrid listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutting down");
    let _ = reclaimer_shutdown.send(true);
    let _ = reclaimer.await;
    pool.stop().await;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "could not listen for shutdown signal");
        return;
    }
    tracing::info!("shutdown signal received");
}
