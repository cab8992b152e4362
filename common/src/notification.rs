//! Signed invalidation notices published on the shared pub/sub channel.
//!
//! The resource service publishes one after every successful policy or
//! secret mutation; every decision replica's loader consumes them. The
//! signature is recomputed on receipt and mismatches are dropped, so a
//! garbled or forged message can never trigger work.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The channel every replica subscribes to.
pub const NOTIFICATION_CHANNEL: &str = "iam.cluster.notifications";

/// Algorithm tag carried in the notification envelope.
pub const SIGNATURE_ALGORITHM: &str = "sha256";

/// What changed on the authoritative store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationCommand {
    PolicyChanged,
    SecretChanged,
}

impl NotificationCommand {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PolicyChanged => "PolicyChanged",
            Self::SecretChanged => "SecretChanged",
        }
    }
}

/// The wire form of an invalidation notice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub command: NotificationCommand,
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub algorithm: String,
}

impl Notification {
    /// Build an already-signed notification with an empty payload.
    #[must_use]
    pub fn new(command: NotificationCommand) -> Self {
        let mut notification = Self {
            command,
            payload: String::new(),
            signature: String::new(),
            algorithm: String::new(),
        };
        notification.sign();
        notification
    }

    /// Sign (or re-sign) the notification: SHA-256 over command ∥ payload.
    pub fn sign(&mut self) {
        self.algorithm = SIGNATURE_ALGORITHM.to_string();
        self.signature = digest(self.command, &self.payload);
    }

    /// Recompute the signature and compare. Receivers must drop anything
    /// that fails this check.
    #[must_use]
    pub fn verify_signature(&self) -> bool {
        self.signature == digest(self.command, &self.payload)
    }
}

fn digest(command: NotificationCommand, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(command.as_str().as_bytes());
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}
