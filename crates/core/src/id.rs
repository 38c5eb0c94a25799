//! Strongly-typed identifiers used across the domain.
//!
//! Identifiers are assigned by the storage layer on first persist and grow
//! monotonically, so they double as a deterministic tie-breaker when two rows
//! share the same timestamp.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Raw storage identifier (untyped row id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

/// Identifier of a persisted queue item (also the "execution id" of a task).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueItemId(u64);

/// Identifier of a transaction log row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionLogId(u64);

macro_rules! impl_numeric_id {
    ($t:ty, $name:literal) => {
        impl $t {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn get(&self) -> u64 {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<u64> for $t {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }

        impl From<$t> for u64 {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let value = u64::from_str(s.trim())
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(value))
            }
        }
    };
}

impl_numeric_id!(EntityId, "EntityId");
impl_numeric_id!(QueueItemId, "QueueItemId");
impl_numeric_id!(TransactionLogId, "TransactionLogId");

macro_rules! impl_entity_id_conversions {
    ($t:ty) => {
        impl From<EntityId> for $t {
            fn from(value: EntityId) -> Self {
                Self(value.0)
            }
        }

        impl From<$t> for EntityId {
            fn from(value: $t) -> Self {
                EntityId(value.0)
            }
        }
    };
}

impl_entity_id_conversions!(QueueItemId);
impl_entity_id_conversions!(TransactionLogId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_round_trip() {
        let id: QueueItemId = "42".parse().unwrap();
        assert_eq!(id, QueueItemId::new(42));
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn rejects_non_numeric_ids() {
        let err = "abc".parse::<TransactionLogId>().unwrap_err();
        assert!(matches!(err, DomainError::InvalidId(msg) if msg.starts_with("TransactionLogId")));
    }

    #[test]
    fn converts_through_entity_id() {
        let raw = EntityId::new(7);
        let item: QueueItemId = raw.into();
        assert_eq!(EntityId::from(item), raw);
    }
}
