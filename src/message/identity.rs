use bitcode::{Decode, Encode};
use std::fmt;

/// What sort of endpoint an authenticated connection belongs to.
#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Device,
    Viewer,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Device => write!(f, "device"),
            EntityKind::Viewer => write!(f, "viewer"),
        }
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "device" | "camera" => Ok(EntityKind::Device),
            "viewer" | "user" | "client" => Ok(EntityKind::Viewer),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// The result of validating a credential: who is connected, and which
/// account owns them.
///
/// Two identities may exchange messages only when their `account_id`s match.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub entity_id: String,
    pub kind: EntityKind,
    pub account_id: String,
}

impl Identity {
    pub fn new(
        entity_id: impl Into<String>,
        kind: EntityKind,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            kind,
            account_id: account_id.into(),
        }
    }

    pub fn is_device(&self) -> bool {
        self.kind == EntityKind::Device
    }

    pub fn same_account(&self, other: &Identity) -> bool {
        self.account_id == other.account_id
    }
}
