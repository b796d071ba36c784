//! Handler registry.
//!
//! Handlers are the application's business use-cases ("does this job
//! exist"). The dispatcher's contract with them is
//! `handle(payload map) -> Result<result map, error>`; typed handlers get the
//! map converted to and from their own structs at this boundary.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::lock::lock_ignore_poison;
use crate::protocol::{from_message_data, to_message_data, MessageData};
use crate::RpcError;

/// Failure reported by a handler. Its message becomes the reply's `error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError(String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for HandlerError {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<RpcError> for HandlerError {
    fn from(value: RpcError) -> Self {
        match value {
            // Relay a sibling's rejection verbatim rather than nesting prefixes.
            RpcError::Remote(msg) => Self(msg),
            other => Self(other.to_string()),
        }
    }
}

/// Result type returned by handlers.
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// Type-erased handler stored in the registry.
pub(crate) trait HandlerFn: Send + Sync {
    fn call(&self, payload: MessageData) -> BoxFuture<'static, HandlerResult<MessageData>>;
}

// Handler working on typed request/response structs.
struct TypedHandler<F, Fut, TReq, TResp>
where
    F: Fn(TReq) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult<TResp>> + Send,
    TReq: DeserializeOwned,
    TResp: Serialize,
{
    func: F,
    _phantom: std::marker::PhantomData<fn(TReq, TResp, Fut)>,
}

impl<F, Fut, TReq, TResp> HandlerFn for TypedHandler<F, Fut, TReq, TResp>
where
    F: Fn(TReq) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<TResp>> + Send + 'static,
    TReq: DeserializeOwned + Send + 'static,
    TResp: Serialize + Send + 'static,
{
    fn call(&self, payload: MessageData) -> BoxFuture<'static, HandlerResult<MessageData>> {
        // ---
        let req: TReq = match from_message_data(payload) {
            Ok(r) => r,
            Err(e) => {
                let err = HandlerError(format!("invalid message_data: {e}"));
                return Box::pin(async move { Err(err) });
            }
        };

        let fut = (self.func)(req);

        Box::pin(async move {
            let resp = fut.await?;
            Ok(to_message_data(&resp)?)
        })
    }
}

// Handler working on the raw payload map.
struct RawHandler<F> {
    func: F,
}

impl<F, Fut> HandlerFn for RawHandler<F>
where
    F: Fn(MessageData) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<MessageData>> + Send + 'static,
{
    fn call(&self, payload: MessageData) -> BoxFuture<'static, HandlerResult<MessageData>> {
        Box::pin((self.func)(payload))
    }
}

/// Handlers keyed by `message_type`. Cheap to clone; clones share entries.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<dyn HandlerFn>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler, replacing any previous one for `message_type`.
    pub fn register<TReq, TResp, F, Fut>(&self, message_type: &str, handler: F)
    where
        TReq: DeserializeOwned + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TReq) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<TResp>> + Send + 'static,
    {
        let handler = TypedHandler {
            func: handler,
            _phantom: std::marker::PhantomData,
        };
        self.insert(message_type, Arc::new(handler));
    }

    /// Register a handler over the raw payload map.
    pub fn register_raw<F, Fut>(&self, message_type: &str, handler: F)
    where
        F: Fn(MessageData) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<MessageData>> + Send + 'static,
    {
        self.insert(message_type, Arc::new(RawHandler { func: handler }));
    }

    /// True if a handler exists for `message_type`.
    pub fn contains(&self, message_type: &str) -> bool {
        lock_ignore_poison(&self.inner).contains_key(message_type)
    }

    /// Registered message types, sorted.
    pub fn message_types(&self) -> Vec<String> {
        let mut types: Vec<String> = lock_ignore_poison(&self.inner).keys().cloned().collect();
        types.sort();
        types
    }

    pub(crate) fn get(&self, message_type: &str) -> Option<Arc<dyn HandlerFn>> {
        lock_ignore_poison(&self.inner).get(message_type).cloned()
    }

    fn insert(&self, message_type: &str, handler: Arc<dyn HandlerFn>) {
        lock_ignore_poison(&self.inner).insert(message_type.to_string(), handler);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct CheckJob {
        job_id: String,
    }

    #[derive(Serialize)]
    struct JobStatus {
        job_id: String,
        exists: bool,
    }

    fn payload(value: serde_json::Value) -> MessageData {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_typed_handler_roundtrip() {
        // ---
        let registry = HandlerRegistry::new();
        registry.register("check_job_exists", |req: CheckJob| async move {
            Ok(JobStatus {
                exists: req.job_id == "J1",
                job_id: req.job_id,
            })
        });

        let handler = registry.get("check_job_exists").unwrap();
        let out = handler.call(payload(json!({"job_id": "J1"}))).await.unwrap();
        assert_eq!(out, payload(json!({"job_id": "J1", "exists": true})));
    }

    #[tokio::test]
    async fn test_typed_handler_bad_payload() {
        // ---
        let registry = HandlerRegistry::new();
        registry.register("check_job_exists", |req: CheckJob| async move {
            Ok(JobStatus {
                job_id: req.job_id,
                exists: true,
            })
        });

        let handler = registry.get("check_job_exists").unwrap();
        let err = handler.call(payload(json!({"id": 7}))).await.unwrap_err();
        assert!(err.message().starts_with("invalid message_data"), "{err}");
    }

    #[tokio::test]
    async fn test_raw_handler_and_lookup() {
        // ---
        let registry = HandlerRegistry::new();
        registry.register_raw("echo", |data| async move { Ok(data) });
        registry.register_raw("fail", |_| async move {
            Err(HandlerError::new("job level not found"))
        });

        assert_eq!(registry.message_types(), vec!["echo", "fail"]);
        assert!(!registry.contains("missing"));
        assert!(registry.get("missing").is_none());

        let fail = registry.get("fail").unwrap();
        let err = fail.call(MessageData::new()).await.unwrap_err();
        assert_eq!(err.message(), "job level not found");
    }

    #[test]
    fn test_remote_error_relayed_verbatim() {
        // ---
        let err = HandlerError::from(RpcError::Remote("no such org".into()));
        assert_eq!(err.message(), "no such org");
    }
}
