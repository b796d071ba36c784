//! Jobs service example.
//!
//! Answers `check_job_exists` for a fixed set of known jobs until Ctrl+C.
//!
//! Run with:
//!
//! ```bash
//! SSO_RPC_BROKER_URI=amqp://localhost:5672/%2f \
//!     cargo run --example jobs_service --features transport_lapin
//! ```

mod common;

use common::{CheckJobExists, JobStatus, CHECK_JOB_EXISTS, JOBS_SERVICE};
use sso_rpc::{HandlerError, RpcNodeBuilder};

const KNOWN_JOBS: &[&str] = &["J1", "J2", "J3"];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    common::init_tracing();

    let config = common::config(JOBS_SERVICE)?;
    tracing::info!(
        "starting {} on {}",
        config.service_name,
        config.broker_uri.as_deref().unwrap_or("memory://")
    );

    // A broker that cannot be reached fails here and the process exits non-zero.
    let node = RpcNodeBuilder::new(config)
        .server_mode()
        .handler(CHECK_JOB_EXISTS, |req: CheckJobExists| async move {
            if req.job_id.is_empty() {
                return Err(HandlerError::new("job_id is required"));
            }
            Ok(JobStatus {
                exists: KNOWN_JOBS.contains(&req.job_id.as_str()),
                job_id: req.job_id,
            })
        })
        .build()
        .await?;

    let stopper = node.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received Ctrl+C, shutting down");
        }
        stopper.shutdown().await;
    });

    // Blocks until shutdown() is called.
    node.run().await?;
    Ok(())
}
