use std::sync::{Arc, Mutex};
use std::time::Duration;

use mimalloc::MiMalloc;
use tokio::sync::watch;
use tracing::{error, info};

use cdn_prewarm_core::collector::MetricCollector;
use cdn_prewarm_core::config::{Config, StoreKind};
use cdn_prewarm_core::http_client::{build_client, CdnHttpClient, RetryPolicy};
use cdn_prewarm_core::loadtest::{LoadTestConfig, LoadTestDriver, Stage};
use cdn_prewarm_core::logging;
use cdn_prewarm_core::metrics;
use cdn_prewarm_core::object_store::{LocalFsObjectStore, ObjectStore, RcloneObjectStore};
use cdn_prewarm_core::pool::{PoolConfig, SizeTieredPool};
use cdn_prewarm_core::prewarm::PrewarmConfig;
use cdn_prewarm_core::prewarm::PrewarmEngine;
use cdn_prewarm_core::workflow::{RunMode, WorkflowCoordinator};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    logging::init();
    metrics::register_metrics()?;

    let config = Config::from_env()?;
    info!(base_url = %config.base_url, store_root = %config.store_root, "starting pre-warm run");

    let metrics_port: u16 = std::env::var("METRICS_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(9090);
    let registry = Arc::new(Mutex::new(prometheus::default_registry().clone()));
    tokio::spawn(metrics::start_metrics_server(metrics_port, Arc::clone(&registry)));

    let store: Arc<dyn ObjectStore> = match config.store_kind {
        StoreKind::LocalFs => Arc::new(LocalFsObjectStore::new(config.store_root.clone())),
        StoreKind::Rclone => Arc::new(RcloneObjectStore::new("rclone", config.store_root.clone())),
        StoreKind::S3 => {
            error!("S3 storage identity requires the `s3` feature; falling back to local filesystem");
            Arc::new(LocalFsObjectStore::new(config.store_root.clone()))
        }
    };

    let build_result = build_client(&config.to_client_config())?;
    let client = Arc::new(CdnHttpClient::new(build_result.client, RetryPolicy::default()));

    let collector = Arc::new(MetricCollector::new());

    let pool_config = PoolConfig {
        total_workers: config.total_workers,
        queue_multiplier: config.queue_multiplier,
        task_timeout: config.task_timeout,
        size_optimized_allocation: config.size_optimized_allocation,
        enqueue_wait: config.enqueue_wait,
    };
    let pool = Arc::new(SizeTieredPool::new(pool_config, Arc::clone(&collector)));

    let prewarm_engine = Arc::new(PrewarmEngine::new(
        Arc::clone(&store),
        Arc::clone(&pool),
        Arc::clone(&client),
        Arc::clone(&collector),
    ));
    let loadtest_driver = Arc::new(LoadTestDriver::new(Arc::clone(&client), Arc::clone(&collector)));

    let coordinator = WorkflowCoordinator::new(prewarm_engine, loadtest_driver, Arc::clone(&collector));

    let prewarm_config = PrewarmConfig {
        base_url: config.base_url.clone(),
        prefix: config.prefix.clone(),
        extensions: config.extensions.clone(),
        derivatives: config.derivative_specs(),
        size_thresholds: config.size_thresholds,
        enqueue_wait: config.enqueue_wait,
        file_list_cache_path: config.file_list_cache_path.clone(),
        file_list_cache_ttl: config.file_list_cache_ttl,
        use_head_before_get: config.use_head_before_get,
    };

    let loadtest_config = LoadTestConfig {
        stages: vec![Stage {
            name: "steady".to_string(),
            users: 10,
            duration: Duration::from_secs(30),
            ramp_up: Some(Duration::from_secs(5)),
        }],
        max_retries: 2,
        retry_delay: Duration::from_millis(250),
        large_file_skip_threshold_bytes: None,
    };

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("ctrl-c received, signalling cancellation");
        let _ = cancel_tx.send(true);
    });

    let result = coordinator
        .run(
            RunMode::Full,
            Some(&prewarm_config),
            None,
            Some(&loadtest_config),
            None,
            config.output_path.as_deref(),
            cancel_rx,
        )
        .await?;

    let summary = coordinator.report_inputs(&result);
    println!("{}", summary.to_markdown());

    // Worker pool shutdown is left to process exit, same as the
    // teacher's original main loop: spawned tasks are dropped when the
    // runtime shuts down.
    Ok(())
}
