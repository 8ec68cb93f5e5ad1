//! Order status state machine.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Processing ──┬──► Completed
///                          └──► Failed
/// ```
///
/// `Completed` is written by downstream fulfillment; this pipeline only
/// writes `Processing` and `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Order is persisted and waiting for its reservation message.
    #[default]
    Pending,

    /// A reservation worker has accepted the order's message.
    Processing,

    /// Order has been fulfilled (terminal state).
    Completed,

    /// Stock could not be reserved within the retry budget (terminal state).
    Failed,
}

impl OrderStatus {
    /// Returns true if the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Processing)
                | (OrderStatus::Processing, OrderStatus::Completed)
                | (OrderStatus::Processing, OrderStatus::Failed)
        )
    }

    /// Returns every status from which `next` may be reached.
    pub fn predecessors_of(next: OrderStatus) -> &'static [OrderStatus] {
        match next {
            OrderStatus::Pending => &[],
            OrderStatus::Processing => &[OrderStatus::Pending],
            OrderStatus::Completed | OrderStatus::Failed => &[OrderStatus::Processing],
        }
    }

    /// Returns true if a reservation attempt may still be claimed.
    pub fn accepts_reservation(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Processing)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Failed)
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "completed" => Ok(OrderStatus::Completed),
            "failed" => Ok(OrderStatus::Failed),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}
