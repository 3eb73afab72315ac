//! Billing gate: who is calling, what they can spend, and the charge itself.
//!
//! The pipeline treats `charge` as atomic and authoritative. It never retries a
//! charge and never reverses one.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::AppError;

pub use memory::MemoryBillingGate;
pub use sqlite::SqliteBillingGate;

/// Caller identity attached to every request by the caller middleware.
///
/// Only the SHA-256 of the presented API key is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    key_hash: Option<String>,
}

impl CallerContext {
    pub fn anonymous() -> Self {
        Self { key_hash: None }
    }

    pub fn from_api_key(api_key: &str) -> Self {
        Self {
            key_hash: Some(hash_api_key(api_key)),
        }
    }

    pub fn key_hash(&self) -> Option<&str> {
        self.key_hash.as_deref()
    }

    pub fn is_anonymous(&self) -> bool {
        self.key_hash.is_none()
    }

    /// Short, non-reversible label for logs
    pub fn log_label(&self) -> &str {
        match &self.key_hash {
            Some(hash) => &hash[..12.min(hash.len())],
            None => "anonymous",
        }
    }
}

/// Hex SHA-256 of an API key
pub fn hash_api_key(api_key: &str) -> String {
    format!("{:x}", Sha256::digest(api_key.as_bytes()))
}

/// Read-only view of a caller's standing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Authorization {
    pub registered: bool,
    pub balance_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

impl Authorization {
    pub fn unregistered() -> Self {
        Self {
            registered: false,
            balance_cents: 0,
            account: None,
        }
    }

    pub fn registered(account: impl Into<String>, balance_cents: i64) -> Self {
        Self {
            registered: true,
            balance_cents,
            account: Some(account.into()),
        }
    }

    /// Registered with a positive balance
    pub fn can_spend(&self) -> bool {
        self.registered && self.balance_cents > 0
    }
}

/// A single deduction attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub amount_cents: i64,
    /// When false the charge must fail cleanly rather than drive the balance below zero
    pub allow_negative: bool,
    /// Replaying the same key must not deduct twice
    pub idempotency_key: String,
    pub description: String,
}

/// Terminal result of a charge attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChargeOutcome {
    pub charged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ChargeOutcome {
    pub fn charged() -> Self {
        Self {
            charged: true,
            message: None,
        }
    }

    pub fn declined(message: impl Into<String>) -> Self {
        Self {
            charged: false,
            message: Some(message.into()),
        }
    }
}

pub const INSUFFICIENT_FUNDS: &str = "Insufficient funds";
pub const UNKNOWN_ACCOUNT: &str = "Unknown or disabled account";

#[async_trait]
pub trait BillingGate: Send + Sync + 'static {
    /// Backend name for logs (e.g. "memory", "sqlite")
    fn backend(&self) -> &str;

    async fn authorize(&self, caller: &CallerContext) -> Result<Authorization, AppError>;

    async fn charge(
        &self,
        caller: &CallerContext,
        request: &ChargeRequest,
    ) -> Result<ChargeOutcome, AppError>;
}
