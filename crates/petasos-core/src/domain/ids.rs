//! Strongly-typed identifiers.
//!
//! # ULID + phantom marker
//! Every identifier is a ULID wrapped in `Id<T>`, where `T` is a zero-sized
//! marker. The marker only exists at compile time, so a `FulfillmentTaskId`
//! can never be passed where an `ActionableTaskId` is expected.
//!
//! ## ULID properties
//! - **Sortable**: the timestamp comes first
//! - **Coordination-free**: any node can mint one

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait for identifier kinds.
///
/// Supplies the prefix used by `Display` ("fulfillment-", "actionable-", ...).
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Accepts both the bare ULID and the prefixed `Display` form.
impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

// Serialized as the bare ULID string so ids travel unchanged across RPC frames.
impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.ulid.serialize(serializer)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ulid::deserialize(deserializer).map(Self::from_ulid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Fulfillment {}

impl IdMarker for Fulfillment {
    fn prefix() -> &'static str {
        "fulfillment-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Actionable {}

impl IdMarker for Actionable {
    fn prefix() -> &'static str {
        "actionable-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Call {}

impl IdMarker for Call {
    fn prefix() -> &'static str {
        "call-"
    }
}

/// One concrete execution attempt on one node.
pub type FulfillmentTaskId = Id<Fulfillment>;

/// The logical unit of work; may be attempted by many fulfillment tasks.
pub type ActionableTaskId = Id<Actionable>;

/// Correlates an RPC request frame with its response frame.
pub type CallId = Id<Call>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_kind_prefix() {
        let ulid = Ulid::new();
        let fulfillment = FulfillmentTaskId::from_ulid(ulid);
        let actionable = ActionableTaskId::from_ulid(ulid);

        assert!(fulfillment.to_string().starts_with("fulfillment-"));
        assert!(actionable.to_string().starts_with("actionable-"));
        // let _: ActionableTaskId = fulfillment; // <- does not compile
    }

    #[test]
    fn parses_prefixed_and_bare_forms() {
        let id = ActionableTaskId::from_ulid(Ulid::new());

        let prefixed: ActionableTaskId = id.to_string().parse().unwrap();
        let bare: ActionableTaskId = id.as_ulid().to_string().parse().unwrap();

        assert_eq!(prefixed, id);
        assert_eq!(bare, id);
    }

    #[test]
    fn serializes_as_bare_ulid() {
        let id = CallId::from_ulid(Ulid::new());

        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_ulid()));

        let back: CallId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn phantom_marker_is_zero_sized() {
        assert_eq!(std::mem::size_of::<FulfillmentTaskId>(), 16);
    }
}
