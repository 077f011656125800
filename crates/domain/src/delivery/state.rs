use serde::{Deserialize, Serialize};

/// The state of a delivery.
///
/// State transitions:
/// ```text
/// Pending ──► Registered ──► InTransit ──► Delivered
///    ▲ │            │
///    │ └─────┬──────┘
///    │       └──► Failed
///    └───────────────┘  (reset_for_retry, explicit new start request only)
/// ```
///
/// Failed is terminal for the saga: nothing moves a failed delivery on its
/// own. The one way out is [`Delivery::reset_for_retry`], taken only when an
/// operator issues a start request newer than the failure.
///
/// [`Delivery::reset_for_retry`]: super::Delivery::reset_for_retry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    /// Row created, courier not yet called.
    #[default]
    Pending,

    /// Courier accepted the shipment and issued a tracking number.
    Registered,

    /// Courier reported the parcel on its way.
    InTransit,

    /// Courier reported the parcel delivered (terminal).
    Delivered,

    /// Courier registration failed (terminal until explicitly retried).
    Failed,
}

impl DeliveryStatus {
    pub fn can_register(&self) -> bool {
        matches!(self, DeliveryStatus::Pending)
    }

    pub fn can_fail(&self) -> bool {
        matches!(self, DeliveryStatus::Pending | DeliveryStatus::Registered)
    }

    pub fn can_complete(&self) -> bool {
        matches!(self, DeliveryStatus::Registered | DeliveryStatus::InTransit)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "PENDING",
            DeliveryStatus::Registered => "REGISTERED",
            DeliveryStatus::InTransit => "IN_TRANSIT",
            DeliveryStatus::Delivered => "DELIVERED",
            DeliveryStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(DeliveryStatus::Pending),
            "REGISTERED" => Ok(DeliveryStatus::Registered),
            "IN_TRANSIT" => Ok(DeliveryStatus::InTransit),
            "DELIVERED" => Ok(DeliveryStatus::Delivered),
            "FAILED" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(DeliveryStatus::Delivered.is_terminal());
        assert!(DeliveryStatus::Failed.is_terminal());
        assert!(!DeliveryStatus::InTransit.is_terminal());
    }

    #[test]
    fn test_fail_only_before_transit() {
        assert!(DeliveryStatus::Pending.can_fail());
        assert!(DeliveryStatus::Registered.can_fail());
        assert!(!DeliveryStatus::InTransit.can_fail());
        assert!(!DeliveryStatus::Delivered.can_fail());
    }

    #[test]
    fn test_parse_round_trips_names() {
        for status in [
            DeliveryStatus::Pending,
            DeliveryStatus::Registered,
            DeliveryStatus::InTransit,
            DeliveryStatus::Delivered,
            DeliveryStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<DeliveryStatus>().unwrap(), status);
        }
    }
}
