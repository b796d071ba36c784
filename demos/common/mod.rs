#![allow(dead_code)]

mod protocol;

pub use protocol::{CheckJobExists, JobStatus, CHECK_JOB_EXISTS, JOBS_SERVICE};

use sso_rpc::{Result, RpcConfig, RpcError};
use tracing_subscriber::EnvFilter;

/// Config from `SSO_RPC_*`, or an in-memory config for `default_service`
/// when `SSO_RPC_SERVICE` is unset.
pub fn config(default_service: &str) -> Result<RpcConfig> {
    // ---
    match RpcConfig::from_env() {
        Err(RpcError::MissingConfig(_)) => {
            let mut config = RpcConfig::memory(default_service);
            config.broker_uri = std::env::var("SSO_RPC_BROKER_URI").ok();
            Ok(config)
        }
        other => other,
    }
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_line_number(false)
        .init();
}
