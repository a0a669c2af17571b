//! Strongly typed identifiers for the three aggregates and their owners.

use circulate_core::stream::StreamId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random id.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID.
            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the inner UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// The event-store stream this id names.
            #[must_use]
            pub fn stream_id(&self) -> StreamId {
                StreamId::from(self.0)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id! {
    /// Unique identifier for a book aggregate. Authoritative everywhere in
    /// the engine; the ISBN is only a boundary-level index.
    BookId
}

uuid_id! {
    /// Unique identifier for a reservation aggregate.
    ReservationId
}

uuid_id! {
    /// Unique identifier for a wallet aggregate.
    WalletId
}

uuid_id! {
    /// Identifier of a user. Users are managed outside this system; the
    /// engine treats the id as opaque.
    UserId
}

/// An ISBN, treated as an opaque unique key. Checksum validation is a
/// boundary concern; the engine only requires non-emptiness.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Isbn(String);

impl Isbn {
    /// Wraps a raw ISBN string.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key is usable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Isbn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Isbn {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct() {
        assert_ne!(BookId::new(), BookId::new());
        assert_ne!(ReservationId::new(), ReservationId::new());
    }

    #[test]
    fn stream_id_round_trip() {
        let id = WalletId::new();
        assert_eq!(id.stream_id().as_str(), id.to_string());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn ids_serialize_as_plain_strings() {
        let id = UserId::new();
        let json = serde_json::to_value(id).unwrap();
        assert_eq!(json, serde_json::json!(id.to_string()));
    }

    #[test]
    fn isbn_is_opaque() {
        let isbn = Isbn::new("978-3-16-148410-0");
        assert_eq!(isbn.as_str(), "978-3-16-148410-0");
        assert!(!isbn.is_empty());
        assert!(Isbn::new("   ").is_empty());
    }
}
