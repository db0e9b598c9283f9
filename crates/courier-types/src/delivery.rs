//! Delivery constraints attached to outgoing operations.
//!
//! The variant set is closed. A transport advertises the kinds it supports
//! natively; anything else must be emulated upstream (delays go through the
//! timeout satellite) or the dispatch is rejected.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A transport-independent requirement on how a message is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DeliveryConstraint {
    /// Drop the message if it has not been received within `time_to_be_received`.
    DiscardIfNotReceivedBefore { time_to_be_received: Duration },
    /// Make the message visible only after `delay` has elapsed.
    DelayDeliveryWith { delay: Duration },
    /// Make the message visible only at or after `at`.
    DoNotDeliverBefore { at: DateTime<Utc> },
}

/// Discriminant of [`DeliveryConstraint`], used for capability declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryConstraintKind {
    DiscardIfNotReceivedBefore,
    DelayDeliveryWith,
    DoNotDeliverBefore,
}

impl DeliveryConstraint {
    pub fn kind(&self) -> DeliveryConstraintKind {
        match self {
            Self::DiscardIfNotReceivedBefore { .. } => DeliveryConstraintKind::DiscardIfNotReceivedBefore,
            Self::DelayDeliveryWith { .. } => DeliveryConstraintKind::DelayDeliveryWith,
            Self::DoNotDeliverBefore { .. } => DeliveryConstraintKind::DoNotDeliverBefore,
        }
    }

    /// Whether this constraint defers delivery.
    pub fn is_delayed_delivery(&self) -> bool {
        self.kind().is_delayed_delivery()
    }

    /// Absolute due time for delayed-delivery constraints.
    pub fn deliver_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::DelayDeliveryWith { delay } => {
                let delay = chrono::Duration::from_std(*delay).unwrap_or(chrono::Duration::MAX);
                Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC))
            }
            Self::DoNotDeliverBefore { at } => Some(*at),
            Self::DiscardIfNotReceivedBefore { .. } => None,
        }
    }
}

impl DeliveryConstraintKind {
    pub fn is_delayed_delivery(&self) -> bool {
        matches!(self, Self::DelayDeliveryWith | Self::DoNotDeliverBefore)
    }
}

impl fmt::Display for DeliveryConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DiscardIfNotReceivedBefore => "DiscardIfNotReceivedBefore",
            Self::DelayDeliveryWith => "DelayDeliveryWith",
            Self::DoNotDeliverBefore => "DoNotDeliverBefore",
        };
        f.write_str(name)
    }
}
