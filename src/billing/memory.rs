use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{
    hash_api_key, Authorization, BillingGate, CallerContext, ChargeOutcome, ChargeRequest,
    INSUFFICIENT_FUNDS, UNKNOWN_ACCOUNT,
};
use crate::config::ApiKeyConfig;
use crate::error::AppError;

/// Idempotency keys remembered per account; older keys are forgotten first
pub const RECENT_CHARGE_KEYS: usize = 1024;

#[derive(Debug, Clone)]
struct MemoryAccount {
    name: String,
    enabled: bool,
    balance_cents: i64,
    recent_charges: RecentKeys,
}

impl MemoryAccount {
    fn new(name: &str, enabled: bool, balance_cents: i64) -> Self {
        Self {
            name: name.to_string(),
            enabled,
            balance_cents,
            recent_charges: RecentKeys::default(),
        }
    }
}

/// Bounded FIFO set of applied idempotency keys
#[derive(Debug, Clone, Default)]
struct RecentKeys {
    order: VecDeque<String>,
    keys: HashSet<String>,
}

impl RecentKeys {
    fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    fn insert(&mut self, key: &str) {
        if !self.keys.insert(key.to_string()) {
            return;
        }
        self.order.push_back(key.to_string());
        while self.order.len() > RECENT_CHARGE_KEYS {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// Billing gate backed by process memory.
///
/// Balances reset on restart; intended for development and tests. Replayed
/// charges are recognized among the last [`RECENT_CHARGE_KEYS`] of each account.
#[derive(Debug, Default)]
pub struct MemoryBillingGate {
    accounts: DashMap<String, MemoryAccount>,
    charge_calls: AtomicU64,
}

impl MemoryBillingGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed accounts from `[[api_keys]]`
    pub fn from_api_keys(keys: &[ApiKeyConfig]) -> Self {
        let gate = Self::new();
        for key in keys {
            gate.accounts.insert(
                hash_api_key(&key.key),
                MemoryAccount::new(&key.name, key.enabled, key.initial_balance_cents),
            );
        }
        gate
    }

    pub fn add_account(&self, name: &str, api_key: &str, balance_cents: i64) {
        self.accounts
            .insert(hash_api_key(api_key), MemoryAccount::new(name, true, balance_cents));
    }

    pub fn balance_of(&self, api_key: &str) -> Option<i64> {
        self.accounts
            .get(&hash_api_key(api_key))
            .map(|account| account.balance_cents)
    }

    /// Number of times `charge` has been invoked, successful or not
    pub fn charge_calls(&self) -> u64 {
        self.charge_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BillingGate for MemoryBillingGate {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn authorize(&self, caller: &CallerContext) -> Result<Authorization, AppError> {
        let Some(hash) = caller.key_hash() else {
            return Ok(Authorization::unregistered());
        };

        Ok(match self.accounts.get(hash) {
            Some(account) if account.enabled => {
                Authorization::registered(account.name.clone(), account.balance_cents)
            }
            _ => Authorization::unregistered(),
        })
    }

    async fn charge(
        &self,
        caller: &CallerContext,
        request: &ChargeRequest,
    ) -> Result<ChargeOutcome, AppError> {
        self.charge_calls.fetch_add(1, Ordering::SeqCst);

        if request.amount_cents < 0 {
            return Err(AppError::Internal(format!(
                "Refusing negative charge of {} cents",
                request.amount_cents
            )));
        }

        let Some(hash) = caller.key_hash() else {
            return Ok(ChargeOutcome::declined(UNKNOWN_ACCOUNT));
        };

        // The shard write lock makes check-and-deduct atomic for this account
        let Some(mut account) = self.accounts.get_mut(hash) else {
            return Ok(ChargeOutcome::declined(UNKNOWN_ACCOUNT));
        };
        if !account.enabled {
            return Ok(ChargeOutcome::declined(UNKNOWN_ACCOUNT));
        }

        if account.recent_charges.contains(&request.idempotency_key) {
            return Ok(ChargeOutcome::charged());
        }

        if !request.allow_negative && account.balance_cents < request.amount_cents {
            return Ok(ChargeOutcome::declined(INSUFFICIENT_FUNDS));
        }

        account.balance_cents -= request.amount_cents;
        account.recent_charges.insert(&request.idempotency_key);
        Ok(ChargeOutcome::charged())
    }
}
