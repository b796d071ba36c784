//! Reply router.
//!
//! Consumes this service's reply queue and hands each response to the
//! waiter registered under its `id`. Replies nobody is waiting for (late,
//! duplicate, or foreign) are logged and discarded; the loop never blocks on
//! them.

use tokio::sync::watch;

use super::pending::CorrelationTable;
use crate::protocol::ResponseEnvelope;
use crate::{
    //
    log_debug,
    log_error,
    log_warn,
    Delivery,
    SubscriptionHandle,
};

/// Counters reported when the router stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterReport {
    /// Replies handed to a waiting call.
    pub delivered: u64,
    /// Well-formed replies with no live waiter.
    pub stale: u64,
    /// Deliveries that did not decode.
    pub malformed: u64,
}

/// Routes replies to the correlation table.
pub struct ReplyRouter {
    transport_id: String,
    table: CorrelationTable,
    report: RouterReport,
}

impl ReplyRouter {
    pub fn new(transport_id: impl Into<String>, table: CorrelationTable) -> Self {
        Self {
            transport_id: transport_id.into(),
            table,
            report: RouterReport::default(),
        }
    }

    /// Route replies until the subscription ends or shutdown is signalled.
    pub async fn run(
        mut self,
        mut sub: SubscriptionHandle,
        mut shutdown: watch::Receiver<bool>,
    ) -> RouterReport {
        // ---
        log_debug!("[{}] reply router started", self.transport_id);

        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                delivery = sub.inbox.recv() => match delivery {
                    Some(d) => d,
                    None => break,
                },
            };
            self.route(delivery).await;
        }

        log_debug!("[{}] reply router stopped: {:?}", self.transport_id, self.report);
        self.report
    }

    async fn route(&mut self, delivery: Delivery) {
        // ---
        let transport_id = &self.transport_id;

        let response = match ResponseEnvelope::decode(&delivery.data) {
            Ok(resp) => resp,
            Err(e) => {
                self.report.malformed += 1;
                log_warn!("[{transport_id}] dropping malformed reply: {e}");
                if let Err(e) = delivery.reject().await {
                    log_error!("[{transport_id}] reject failed: {e}");
                }
                return;
            }
        };

        if let Err(e) = delivery.ack().await {
            log_error!("[{transport_id}] ack failed for reply {}: {e}", response.id);
        }

        let id = response.id.clone();
        if self.table.deliver(&id, response) {
            self.report.delivered += 1;
        } else {
            self.report.stale += 1;
            log_debug!("[{transport_id}] no waiter for reply {id}, discarded");
        }
    }
}
