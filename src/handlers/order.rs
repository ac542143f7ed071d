//! Order handler (C7): closes out the order-lookup step of the Workflow
//! Engine when the order service's response arrives.

use super::HandlerContext;
use crate::protocol::{Envelope, OrderNew};
use crate::routing::Handler;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Handles `order.new`: the order service is a peer, not a subordinate of
/// the scheduler, so this only consumes the response to the `order.request`
/// the Workflow Engine already published; it never originates the lookup.
pub struct OrderHandler {
    ctx: HandlerContext,
    new_topic: String,
}

impl OrderHandler {
    pub fn new(ctx: HandlerContext, new_topic: impl Into<String>) -> Self {
        Self {
            ctx,
            new_topic: new_topic.into(),
        }
    }

    async fn on_new(&self, envelope: Envelope) {
        let payload: OrderNew = match serde_json::from_value(envelope.data.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "order.new: undecodable payload");
                return;
            }
        };

        self.ctx.workflow.on_order_new(payload.order_id, envelope.message_id).await;
    }
}

#[async_trait]
impl Handler for OrderHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        if topic != self.new_topic {
            return;
        }
        let envelope = match Envelope::deserialize(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%topic, error = %e, "order handler: undecodable envelope");
                return;
            }
        };
        if envelope.is_expired() {
            debug!(%topic, "order handler: dropping expired envelope");
            return;
        }
        self.on_new(envelope).await;
    }

    fn can_handle(&self, topic: &str) -> bool {
        topic == self.new_topic
    }

    fn supported_topics(&self) -> Vec<String> {
        vec![self.new_topic.clone()]
    }
}
