//! Device Identity
//!
//! A locally generated, persisted pseudo-identifier standing in for a
//! user or installation in the absence of authentication. Created once,
//! stored under a well-known key, never rotated.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;
use uuid::Uuid;

use crate::store::KvStore;

/// Store key under which the device identity is persisted.
pub const DEVICE_ID_KEY: &str = "device_id";

/// Opaque token identifying one client installation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap an existing token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Generate a fresh random identity
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The token as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Load the persisted identity, generating and persisting a fresh one
    /// the first time. Generation never blocks on persistence: if the
    /// store cannot be read or written the new identity is still used for
    /// the rest of the session.
    pub fn load_or_create(store: &mut impl KvStore) -> Self {
        match store.get(DEVICE_ID_KEY) {
            Ok(Some(token)) if !token.is_empty() => return Self(token),
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "device identity unreadable, generating a session identity");
            }
        }

        let id = Self::generate();
        if let Err(err) = store.set(DEVICE_ID_KEY, id.as_str()) {
            warn!(%err, "could not persist device identity");
        }
        id
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
