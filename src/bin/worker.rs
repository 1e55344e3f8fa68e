use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use envconfig::Envconfig;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::{error, info};

use stevedore_core::{Config, JobOptions, Queue, StorageAdapter, Worker};

async fn liveness() -> &'static str {
    "ok"
}

fn app(ready: Arc<std::sync::atomic::AtomicBool>, metrics: PrometheusHandle) -> Router {
    Router::new()
        .route("/", get(|| async { "stevedore-worker" }))
        .route("/_liveness", get(liveness))
        .route(
            "/_readiness",
            get(move || {
                let ready = ready.clone();
                async move {
                    if ready.load(std::sync::atomic::Ordering::SeqCst) {
                        "ready"
                    } else {
                        "not ready"
                    }
                }
            }),
        )
        .route("/metrics", get(move || async move { metrics.render() }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    let config = Config::init_from_env()?;
    let bind_addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let pool_config = config.get_pool_config();
    let worker_config = config.get_worker_config();
    let remote_config = config.get_remote_config()?;

    let storage = StorageAdapter::connect(&pool_config).await?;
    let queue = Queue::wait_until_ready(&storage, &worker_config.queue_name, JobOptions::default())
        .await?;

    let ready = Arc::new(std::sync::atomic::AtomicBool::new(false));

    let worker = Worker::connect(storage, queue, remote_config, worker_config).await?;
    ready.store(true, std::sync::atomic::Ordering::SeqCst);

    info!(addr = %bind_addr, "stevedore-worker starting");

    let http = axum::serve(
        tokio::net::TcpListener::bind(bind_addr).await?,
        app(ready, metrics_handle),
    );

    tokio::select! {
        result = worker.run() => {
            if let Err(e) = result {
                error!(error = %e, "worker loop exited with an error");
            }
        }
        result = http => {
            if let Err(e) = result {
                error!(error = %e, "http server exited with an error");
            }
        }
    }

    Ok(())
}
