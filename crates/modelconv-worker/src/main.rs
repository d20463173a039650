//! Model conversion worker binary.

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use modelconv_blender::{check_blender, BlenderConverter};
use modelconv_queue::{JobQueue, NotificationStream};
use modelconv_storage::S3Store;
use modelconv_worker::{
    metrics, ExecutorSettings, JobExecutor, JobProcessor, Notifier, ProcessorSettings,
    WorkerConfig,
};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("modelconv=info".parse().expect("valid directive"))
        .add_directive("aws_config=warn".parse().expect("valid directive"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting modelconv-worker");

    // Missing required configuration is fatal before any polling.
    let config = match WorkerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Worker config: {:?}", config);

    if let Some(port) = config.metrics_port {
        match metrics::init_metrics(port) {
            Ok(()) => info!("Metrics listening on port {}", port),
            Err(e) => warn!("{}", e),
        }
    }

    if let Err(e) = check_blender(&config.blender_bin) {
        warn!("{}; conversions will fail until it is installed", e);
    }

    let store = match S3Store::from_env().await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create object store: {}", e);
            std::process::exit(1);
        }
    };

    let consumer_name = format!("worker-{}", Uuid::new_v4());
    let queue = match JobQueue::new(config.queue_config(), consumer_name) {
        Ok(q) => q,
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = queue.init().await {
        error!("Failed to initialize job queue: {}", e);
        std::process::exit(1);
    }
    let intake = Arc::new(queue);

    let notifications = match NotificationStream::new(&config.redis_url, &config.notification_stream) {
        Ok(n) => n,
        Err(e) => {
            error!("Failed to create notification channel: {}", e);
            std::process::exit(1);
        }
    };

    let processor = JobProcessor::new(
        intake.clone(),
        Arc::new(store),
        Arc::new(BlenderConverter::new(config.blender_config())),
        Notifier::new(Arc::new(notifications)),
        ProcessorSettings::from_config(&config),
    );

    let executor = Arc::new(JobExecutor::new(
        ExecutorSettings::from_config(&config),
        intake,
        Arc::new(processor),
    ));

    // Setup signal handlers
    let signal_executor = Arc::clone(&executor);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        signal_executor.shutdown();
    });

    if let Err(e) = executor.run().await {
        error!("Executor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
