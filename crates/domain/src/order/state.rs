//! Order and item state machines.

use serde::{Deserialize, Serialize};

/// The state of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Paid ──► Fulfilled
///    │         │
///    └────┬────┴──► Failed
///         └───────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order placed, awaiting payment.
    #[default]
    Pending,

    /// Payment confirmed, items are being fulfilled.
    Paid,

    /// Every item reached a terminal success state (terminal).
    Fulfilled,

    /// Payment failed (terminal).
    Failed,

    /// Checkout abandoned or cancelled (terminal).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if payment can be recorded in this state.
    pub fn can_mark_paid(&self) -> bool {
        matches!(self, OrderStatus::Pending)
    }

    /// Returns true if the order can fail in this state.
    pub fn can_fail(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Paid)
    }

    /// Returns true if the order can be cancelled in this state.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Paid)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Fulfilled | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }

    /// Returns the state name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Fulfilled => "FULFILLED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "FULFILLED" => Ok(OrderStatus::Fulfilled),
            "FAILED" => Ok(OrderStatus::Failed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// The state of a single line item.
///
/// State transitions:
/// ```text
/// Pending ──► Paid ──┬──► DigitalUnlocked
///                    └──► Shipped ──► Delivered
///
/// any non-terminal ──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    #[default]
    Pending,
    Paid,
    DigitalUnlocked,
    Shipped,
    Delivered,
    Cancelled,
}

impl ItemStatus {
    /// Returns true if `next` is an allowed edge from this state.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        match (*self, next) {
            (Pending, Paid) => true,
            (Paid, DigitalUnlocked) | (Paid, Shipped) => true,
            (Shipped, Delivered) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Returns true for the states an item finishes in after a successful order.
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, ItemStatus::DigitalUnlocked | ItemStatus::Delivered)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::DigitalUnlocked | ItemStatus::Delivered | ItemStatus::Cancelled
        )
    }

    /// Returns the state name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "PENDING",
            ItemStatus::Paid => "PAID",
            ItemStatus::DigitalUnlocked => "DIGITAL_UNLOCKED",
            ItemStatus::Shipped => "SHIPPED",
            ItemStatus::Delivered => "DELIVERED",
            ItemStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ItemStatus::Pending),
            "PAID" => Ok(ItemStatus::Paid),
            "DIGITAL_UNLOCKED" => Ok(ItemStatus::DigitalUnlocked),
            "SHIPPED" => Ok(ItemStatus::Shipped),
            "DELIVERED" => Ok(ItemStatus::Delivered),
            "CANCELLED" => Ok(ItemStatus::Cancelled),
            other => Err(format!("unknown item status: {other}")),
        }
    }
}
