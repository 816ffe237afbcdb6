use crate::error::{AuthError, HubError};
use camrelay::message::Identity;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Maps a bearer credential to the identity it was issued for.
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, credential: &str) -> Result<Identity, AuthError>;
}

/// Ownership and presence data kept by the persistence layer.
#[async_trait::async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Account owning `device_id`, or `None` for an unknown device.
    async fn owner_of(&self, device_id: &str) -> Result<Option<String>, HubError>;

    async fn set_online(
        &self,
        device_id: &str,
        online: bool,
        at: DateTime<Utc>,
    ) -> Result<(), HubError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presence {
    pub online: bool,
    pub changed_at: DateTime<Utc>,
}

#[derive(Default)]
struct DirectoryState {
    credentials: HashMap<String, Identity>,
    owners: HashMap<String, String>,
    presence: HashMap<String, Presence>,
}

/// In-memory `Authenticator` + `DeviceDirectory`, configured up front.
#[derive(Default)]
pub struct MemoryDirectory {
    state: Mutex<DirectoryState>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DirectoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accepts `credential` as `identity`. Device identities also register
    /// their ownership.
    pub fn add_credential(&self, credential: impl Into<String>, identity: Identity) {
        let mut state = self.lock();

        if identity.is_device() {
            state
                .owners
                .insert(identity.entity_id.clone(), identity.account_id.clone());
        }
        state.credentials.insert(credential.into(), identity);
    }

    pub fn add_device(&self, device_id: impl Into<String>, account_id: impl Into<String>) {
        self.lock()
            .owners
            .insert(device_id.into(), account_id.into());
    }

    pub fn presence(&self, device_id: &str) -> Option<Presence> {
        self.lock().presence.get(device_id).copied()
    }
}

#[async_trait::async_trait]
impl Authenticator for MemoryDirectory {
    async fn authenticate(&self, credential: &str) -> Result<Identity, AuthError> {
        if credential.is_empty() {
            return Err(AuthError::MissingCredential);
        }

        self.lock()
            .credentials
            .get(credential)
            .cloned()
            .ok_or(AuthError::InvalidCredential)
    }
}

#[async_trait::async_trait]
impl DeviceDirectory for MemoryDirectory {
    async fn owner_of(&self, device_id: &str) -> Result<Option<String>, HubError> {
        Ok(self.lock().owners.get(device_id).cloned())
    }

    async fn set_online(
        &self,
        device_id: &str,
        online: bool,
        at: DateTime<Utc>,
    ) -> Result<(), HubError> {
        self.lock().presence.insert(
            device_id.to_string(),
            Presence {
                online,
                changed_at: at,
            },
        );
        Ok(())
    }
}
