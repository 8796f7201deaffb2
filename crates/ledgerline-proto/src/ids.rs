use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Portal user (staff or client contact).
    UserId
);
entity_id!(TaskId);
entity_id!(ProjectId);
entity_id!(ClientId);
entity_id!(DocumentId);
entity_id!(MilestoneId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_plain_json_numbers() {
        assert_eq!(serde_json::to_string(&TaskId(7)).unwrap(), "7");
        let user: UserId = serde_json::from_str("42").unwrap();
        assert_eq!(user, UserId(42));
        assert!(serde_json::from_str::<UserId>("\"42\"").is_err());
    }
}
