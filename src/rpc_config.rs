//! Public, transport-agnostic RPC configuration.
//!
//! Contains no broker-client types. Transport constructors interpret
//! `broker_uri`; the node uses the rest.

use std::time::Duration;

use crate::{Result, RpcError};

/// Default deadline for a single call.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Default number of handlers allowed to run at once.
pub const DEFAULT_HANDLER_CONCURRENCY: usize = 64;

/// Default limit on a single broker publish.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest accepted `outbound_capacity` or `handler_concurrency`.
pub const MAX_QUEUE_LIMIT: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Suffix appended to the service name to form the default reply queue.
pub const REPLY_QUEUE_SUFFIX: &str = ".reply";

const ENV_SERVICE: &str = "SSO_RPC_SERVICE";
const ENV_BROKER_URI: &str = "SSO_RPC_BROKER_URI";
const ENV_TIMEOUT_MS: &str = "SSO_RPC_TIMEOUT_MS";
const ENV_OUTBOUND_CAPACITY: &str = "SSO_RPC_OUTBOUND_CAPACITY";
const ENV_HANDLER_CONCURRENCY: &str = "SSO_RPC_HANDLER_CONCURRENCY";
const ENV_REQUEST_QUEUE: &str = "SSO_RPC_REQUEST_QUEUE";
const ENV_REPLY_QUEUE: &str = "SSO_RPC_REPLY_QUEUE";
const ENV_PUBLISH_TIMEOUT_MS: &str = "SSO_RPC_PUBLISH_TIMEOUT_MS";

/// Node configuration and connection parameters.
#[derive(Debug, Clone)]
pub struct RpcConfig {
    // ---
    /// Name of this service. Also the default inbound request queue.
    pub service_name: String,

    /// Broker connection URI, e.g. `"amqp://localhost:5672/%2f"`.
    ///
    /// `None` selects the in-memory transport.
    pub broker_uri: Option<String>,

    /// Inbound request queue override. Defaults to `service_name`.
    pub request_queue_name: Option<String>,

    /// Reply queue override. Defaults to `"{service_name}.reply"`.
    pub reply_queue_name: Option<String>,

    /// Deadline applied to calls that do not pass their own.
    ///
    /// Default: 10 seconds
    pub request_timeout: Duration,

    /// Longest the outbound multiplexer waits on one broker publish before
    /// dropping the item.
    ///
    /// Default: 5 seconds
    pub publish_timeout: Duration,

    /// Capacity of the bounded queue feeding the outbound multiplexer.
    pub outbound_capacity: usize,

    /// Maximum number of handlers running concurrently.
    pub handler_concurrency: usize,
}

impl RpcConfig {
    /// Config for a broker-backed node.
    pub fn with_broker(broker_uri: impl Into<String>, service_name: impl Into<String>) -> Self {
        Self {
            broker_uri: Some(broker_uri.into()),
            ..Self::memory(service_name)
        }
    }

    /// Config for an in-memory node (no broker).
    pub fn memory(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            broker_uri: None,
            request_queue_name: None,
            reply_queue_name: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            handler_concurrency: DEFAULT_HANDLER_CONCURRENCY,
        }
    }

    /// Build a config from `SSO_RPC_*` environment variables.
    ///
    /// `SSO_RPC_SERVICE` is required; everything else falls back to defaults.
    ///
    /// # Errors
    ///
    /// [`RpcError::MissingConfig`] without a service name,
    /// [`RpcError::InvalidConfig`] for unparsable numbers or a config that
    /// fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // ---
        let service = lookup(ENV_SERVICE)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| RpcError::MissingConfig(ENV_SERVICE.into()))?;

        let mut config = Self::memory(service);
        config.broker_uri = lookup(ENV_BROKER_URI).filter(|s| !s.is_empty());
        config.request_queue_name = lookup(ENV_REQUEST_QUEUE).filter(|s| !s.is_empty());
        config.reply_queue_name = lookup(ENV_REPLY_QUEUE).filter(|s| !s.is_empty());

        if let Some(ms) = lookup(ENV_TIMEOUT_MS) {
            config.request_timeout = Duration::from_millis(parse_number(ENV_TIMEOUT_MS, &ms)?);
        }
        if let Some(ms) = lookup(ENV_PUBLISH_TIMEOUT_MS) {
            config.publish_timeout =
                Duration::from_millis(parse_number(ENV_PUBLISH_TIMEOUT_MS, &ms)?);
        }
        if let Some(n) = lookup(ENV_OUTBOUND_CAPACITY) {
            config.outbound_capacity = parse_number(ENV_OUTBOUND_CAPACITY, &n)?;
        }
        if let Some(n) = lookup(ENV_HANDLER_CONCURRENCY) {
            config.handler_concurrency = parse_number(ENV_HANDLER_CONCURRENCY, &n)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set a custom request queue name.
    pub fn with_request_queue_name(mut self, name: impl Into<String>) -> Self {
        self.request_queue_name = Some(name.into());
        self
    }

    /// Set a custom reply queue name.
    pub fn with_reply_queue_name(mut self, name: impl Into<String>) -> Self {
        self.reply_queue_name = Some(name.into());
        self
    }

    /// Set the default per-call deadline.
    ///
    /// # Example
    ///
    /// ```
    /// use sso_rpc::RpcConfig;
    /// use std::time::Duration;
    ///
    /// let config = RpcConfig::with_broker("amqp://localhost:5672/%2f", "sso")
    ///     .with_request_timeout(Duration::from_secs(3));
    /// assert_eq!(config.request_timeout, Duration::from_secs(3));
    /// ```
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the limit on a single broker publish.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Set the outbound queue capacity.
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Set the handler concurrency limit.
    pub fn with_handler_concurrency(mut self, limit: usize) -> Self {
        self.handler_concurrency = limit;
        self
    }

    /// Effective inbound request queue name.
    pub fn request_queue(&self) -> String {
        self.request_queue_name
            .clone()
            .unwrap_or_else(|| self.service_name.clone())
    }

    /// Effective reply queue name.
    pub fn reply_queue(&self) -> String {
        self.reply_queue_name
            .clone()
            .unwrap_or_else(|| format!("{}{REPLY_QUEUE_SUFFIX}", self.service_name))
    }

    /// Reject configurations the node cannot run with.
    ///
    /// # Errors
    ///
    /// [`RpcError::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        // ---
        if self.service_name.trim().is_empty() {
            return Err(RpcError::InvalidConfig("service_name is empty".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(RpcError::InvalidConfig("request_timeout is zero".into()));
        }
        if self.publish_timeout.is_zero() {
            return Err(RpcError::InvalidConfig("publish_timeout is zero".into()));
        }
        check_limit("outbound_capacity", self.outbound_capacity)?;
        check_limit("handler_concurrency", self.handler_concurrency)?;
        if self.request_queue() == self.reply_queue() {
            return Err(RpcError::InvalidConfig(format!(
                "request and reply queues must differ, both are {}",
                self.request_queue()
            )));
        }
        Ok(())
    }
}

fn check_limit(name: &str, value: usize) -> Result<()> {
    match value {
        0 => Err(RpcError::InvalidConfig(format!("{name} is zero"))),
        n if n > MAX_QUEUE_LIMIT => Err(RpcError::InvalidConfig(format!(
            "{name} is {n}, above the limit of {MAX_QUEUE_LIMIT}"
        ))),
        _ => Ok(()),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| RpcError::InvalidConfig(format!("{key}: not a number: {raw:?}")))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        // ---
        let config = RpcConfig::memory("sso");
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.request_queue(), "sso");
        assert_eq!(config.reply_queue(), "sso.reply");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_env_values() {
        // ---
        let config = RpcConfig::from_lookup(lookup(&[
            ("SSO_RPC_SERVICE", "sso"),
            ("SSO_RPC_BROKER_URI", "amqp://localhost:5672/%2f"),
            ("SSO_RPC_TIMEOUT_MS", "2500"),
            ("SSO_RPC_OUTBOUND_CAPACITY", "8"),
            ("SSO_RPC_REPLY_QUEUE", "sso-replies"),
        ]))
        .unwrap();

        assert_eq!(config.broker_uri.as_deref(), Some("amqp://localhost:5672/%2f"));
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.outbound_capacity, 8);
        assert_eq!(config.handler_concurrency, DEFAULT_HANDLER_CONCURRENCY);
        assert_eq!(config.reply_queue(), "sso-replies");
    }

    #[test]
    fn test_from_env_errors() {
        // ---
        assert!(matches!(
            RpcConfig::from_lookup(lookup(&[])),
            Err(RpcError::MissingConfig(_))
        ));
        assert!(matches!(
            RpcConfig::from_lookup(lookup(&[
                ("SSO_RPC_SERVICE", "sso"),
                ("SSO_RPC_TIMEOUT_MS", "soon"),
            ])),
            Err(RpcError::InvalidConfig(_))
        ));
        assert!(matches!(
            RpcConfig::from_lookup(lookup(&[
                ("SSO_RPC_SERVICE", "sso"),
                ("SSO_RPC_TIMEOUT_MS", "0"),
            ])),
            Err(RpcError::InvalidConfig(_))
        ));

        let too_many = usize::MAX.to_string();
        assert!(matches!(
            RpcConfig::from_lookup(lookup(&[
                ("SSO_RPC_SERVICE", "sso"),
                ("SSO_RPC_HANDLER_CONCURRENCY", too_many.as_str()),
            ])),
            Err(RpcError::InvalidConfig(_))
        ));
        assert!(matches!(
            RpcConfig::from_lookup(lookup(&[
                ("SSO_RPC_SERVICE", "sso"),
                ("SSO_RPC_OUTBOUND_CAPACITY", too_many.as_str()),
            ])),
            Err(RpcError::InvalidConfig(_))
        ));
        assert!(matches!(
            RpcConfig::from_lookup(lookup(&[
                ("SSO_RPC_SERVICE", "sso"),
                ("SSO_RPC_PUBLISH_TIMEOUT_MS", "0"),
            ])),
            Err(RpcError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_limits_accept_the_boundary() {
        // ---
        let at_limit = RpcConfig::memory("sso")
            .with_handler_concurrency(MAX_QUEUE_LIMIT)
            .with_outbound_capacity(MAX_QUEUE_LIMIT);
        assert!(at_limit.validate().is_ok());

        let over = RpcConfig::memory("sso").with_handler_concurrency(MAX_QUEUE_LIMIT + 1);
        assert!(matches!(over.validate(), Err(RpcError::InvalidConfig(_))));
    }

    #[test]
    fn test_same_queue_rejected() {
        // ---
        let config = RpcConfig::memory("sso").with_reply_queue_name("sso");
        assert!(matches!(config.validate(), Err(RpcError::InvalidConfig(_))));
    }
}
