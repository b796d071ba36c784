//! Jobs client example.
//!
//! Asks the jobs service whether a few jobs exist. Against the in-memory
//! transport (no `SSO_RPC_BROKER_URI`) it starts its own jobs service in the
//! same process.
//!
//! Run with: cargo run --example jobs_client

mod common;

use common::{CheckJobExists, JobStatus, CHECK_JOB_EXISTS, JOBS_SERVICE};
use sso_rpc::{RpcConfig, RpcNode, RpcNodeBuilder};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---
    common::init_tracing();

    let config = common::config("sso")?;

    let local_service = if config.broker_uri.is_none() {
        Some(in_process_jobs_service().await?)
    } else {
        None
    };

    let node = RpcNodeBuilder::new(config).client_mode().build().await?;

    for job_id in ["J1", "J7"] {
        let req = CheckJobExists {
            job_id: job_id.to_string(),
        };
        match node
            .call_typed::<_, JobStatus>(JOBS_SERVICE, CHECK_JOB_EXISTS, &req, Some(Duration::from_secs(5)))
            .await
        {
            Ok(status) => println!("{} exists: {}", status.job_id, status.exists),
            Err(e) if e.is_timeout() => println!("{job_id}: jobs service did not answer"),
            Err(e) => println!("{job_id}: {e}"),
        }
    }

    node.shutdown().await;
    if let Some(service) = local_service {
        service.shutdown().await;
    }
    Ok(())
}

async fn in_process_jobs_service() -> sso_rpc::Result<RpcNode> {
    // ---
    RpcNodeBuilder::new(RpcConfig::memory(JOBS_SERVICE))
        .server_mode()
        .handler(CHECK_JOB_EXISTS, |req: CheckJobExists| async move {
            Ok(JobStatus {
                exists: req.job_id == "J1",
                job_id: req.job_id,
            })
        })
        .build()
        .await
}
