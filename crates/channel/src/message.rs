//! The reservation message and its wire envelope.

use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{LineItem, Order};
use serde::{Deserialize, Serialize};

use crate::{ChannelError, Result};

/// Schema tag written into every envelope.
pub const SCHEMA_VERSION: &str = "v1";

/// Asks a worker to reserve stock for every item of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationMessage {
    pub order_id: OrderId,
    pub items: Vec<LineItem>,
    /// When the order was accepted. Kept unchanged across retries.
    pub timestamp: DateTime<Utc>,
    /// 0 for the first delivery, incremented on each republish.
    pub retry_count: u32,
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "schema")]
enum Envelope {
    #[serde(rename = "v1")]
    V1(ReservationMessage),
}

impl ReservationMessage {
    /// Creates the first message for a persisted order.
    pub fn new(order_id: OrderId, items: Vec<LineItem>, timestamp: DateTime<Utc>) -> Self {
        Self {
            order_id,
            items,
            timestamp,
            retry_count: 0,
        }
    }

    /// Creates a fresh first message from a stored order.
    pub fn for_order(order: &Order) -> Self {
        Self::new(order.id, order.items.clone(), order.created_at)
    }

    /// Returns the message to republish after a failed attempt.
    pub fn next_retry(&self) -> Self {
        Self {
            retry_count: self.retry_count + 1,
            ..self.clone()
        }
    }

    /// Encodes the message into its versioned JSON envelope.
    pub fn encode(&self) -> Result<serde_json::Value> {
        serde_json::to_value(Envelope::V1(self.clone())).map_err(ChannelError::Encode)
    }

    /// Decodes a versioned JSON envelope.
    pub fn decode(payload: &serde_json::Value) -> Result<Self> {
        let schema = payload.get("schema").and_then(serde_json::Value::as_str);
        if schema != Some(SCHEMA_VERSION) {
            return Err(ChannelError::Decode(match schema {
                Some(other) => format!("unsupported schema '{other}'"),
                None => "missing schema tag".to_string(),
            }));
        }

        match serde_json::from_value::<Envelope>(payload.clone()) {
            Ok(Envelope::V1(message)) => Ok(message),
            Err(e) => Err(ChannelError::Decode(e.to_string())),
        }
    }

    /// Reads the order id from a payload without decoding the rest of it.
    pub fn peek_order_id(payload: &serde_json::Value) -> Option<OrderId> {
        payload
            .get("order_id")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Money;
    use domain::LineItemRequest;
    use serde_json::json;

    fn message() -> ReservationMessage {
        ReservationMessage::new(
            OrderId::new(),
            vec![LineItem::resolve(
                LineItemRequest::new("prod-1", "sku-m", 3),
                Money::from_dollars(90),
                10,
            )],
            Utc::now(),
        )
    }

    #[test]
    fn test_envelope_carries_schema_tag() {
        let msg = message();
        let payload = msg.encode().unwrap();

        assert_eq!(payload["schema"], "v1");
        assert_eq!(payload["retry_count"], 0);
        assert_eq!(payload["order_id"], msg.order_id.to_string());
        assert_eq!(payload["items"][0]["quantity"], 3);
        assert_eq!(ReservationMessage::decode(&payload).unwrap(), msg);
    }

    #[test]
    fn test_next_retry_keeps_order_and_timestamp() {
        let msg = message();
        let retry = msg.next_retry().next_retry();

        assert_eq!(retry.retry_count, 2);
        assert_eq!(retry.order_id, msg.order_id);
        assert_eq!(retry.timestamp, msg.timestamp);
    }

    #[test]
    fn test_unknown_schema_is_rejected() {
        let mut payload = message().encode().unwrap();
        payload["schema"] = json!("v9");

        let err = ReservationMessage::decode(&payload).unwrap_err();
        assert!(matches!(err, ChannelError::Decode(reason) if reason.contains("v9")));
    }

    #[test]
    fn test_malformed_payloads_are_rejected() {
        for payload in [
            json!("not an object"),
            json!({"order_id": "abc"}),
            json!({"schema": "v1", "order_id": "not-a-uuid", "items": [], "timestamp": "2024-01-01T00:00:00Z", "retry_count": 0}),
            json!({"schema": "v1", "order_id": OrderId::new(), "items": []}),
        ] {
            assert!(matches!(
                ReservationMessage::decode(&payload),
                Err(ChannelError::Decode(_))
            ));
        }
    }

    #[test]
    fn test_peek_order_id() {
        let msg = message();
        let payload = msg.encode().unwrap();
        assert_eq!(ReservationMessage::peek_order_id(&payload), Some(msg.order_id));
        assert_eq!(ReservationMessage::peek_order_id(&json!({"x": 1})), None);
    }
}
