use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// String-backed identifier. `generated` variants also get a prefixed
/// UUIDv7 constructor.
macro_rules! string_id {
    ($name:ident) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
    ($name:ident, generated $prefix:expr) => {
        string_id!($name);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}

/// Integer key of static catalog data.
macro_rules! catalog_id {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(v: i64) -> Self {
                Self(v)
            }
        }
    };
}

// Issued by the external account subsystem.
string_id!(AccountId);
// Derived from the two accounts, never generated.
string_id!(PartnershipId);
string_id!(PairingRequestId, generated "pair");

catalog_id!(TopicId);
catalog_id!(SubtopicId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_request_id_has_prefix() {
        let id = PairingRequestId::new();
        assert!(id.as_str().starts_with("pair_"), "got: {id}");
    }

    #[test]
    fn pairing_request_ids_are_unique() {
        assert_ne!(PairingRequestId::new(), PairingRequestId::new());
    }

    #[test]
    fn account_id_from_raw_preserves_value() {
        let id = AccountId::from_raw("uid-123");
        assert_eq!(id.as_str(), "uid-123");
        assert_eq!(id.to_string(), "uid-123");
    }

    #[test]
    fn string_ids_serialize_transparently() {
        let id = PartnershipId::from_raw("a-b");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"a-b\"");
    }

    #[test]
    fn catalog_ids_serialize_as_numbers() {
        let ids = vec![TopicId(3), TopicId(1)];
        assert_eq!(serde_json::to_string(&ids).unwrap(), "[3,1]");
        let parsed: Vec<SubtopicId> = serde_json::from_str("[7,9]").unwrap();
        assert_eq!(parsed, vec![SubtopicId(7), SubtopicId(9)]);
    }
}
