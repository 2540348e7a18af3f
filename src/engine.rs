// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Loyalty points engine.
//!
//! The [`Engine`] resolves balances, lists the reward catalog, redeems rewards
//! and records earnings on top of a [`LedgerStore`].
//!
//! # Balances
//!
//! A balance is always the resulting balance of the last entry of a
//! (tenant, customer) ledger, or 0 for an empty ledger. It is never stored
//! anywhere else and never recomputed by summing a filtered subset of entries.
//!
//! # Concurrency
//!
//! Redemption is read-validate-append: the engine reads the ledger head,
//! checks the balance against the reward cost, then appends with a
//! compare-and-swap on the head it read. A concurrent writer on the same key
//! makes the append fail with [`LedgerError::Conflict`]; the engine then
//! starts over from a fresh read, up to [`RetryPolicy::max_attempts`] times.
//! Different keys never share a lock.

use crate::base::{CustomerId, LedgerKey, RewardId, TenantId};
use crate::catalog::{CatalogEntry, Reward, RewardCatalog};
use crate::customer::CustomerRegistry;
use crate::error::Entity;
use crate::ledger::{Expectation, LedgerHead};
use crate::store::{LedgerStore, MemoryLedger};
use crate::tenant::TenantRegistry;
use crate::transaction::{NewEntry, Transaction, TransactionKind};
use crate::LedgerError;
use serde::Serialize;
use std::sync::Arc;

/// Bound on compare-and-swap attempts for one redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}

/// Balance of one ledger together with display statistics.
///
/// `total_earned` and `total_redeemed` are informational; `balance` is the
/// only authoritative figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceSummary {
    pub tenant_id: TenantId,
    pub balance: i64,
    pub transaction_count: usize,
    pub total_earned: i64,
    pub total_redeemed: i64,
}

/// Loyalty points engine over a ledger store.
///
/// # Invariants
///
/// - For every key, each entry's resulting balance equals the previous
///   entry's resulting balance (or 0) plus its own points.
/// - A redemption never takes a balance below zero.
/// - Earnings are strictly positive.
pub struct Engine<S = MemoryLedger> {
    tenants: Arc<TenantRegistry>,
    customers: Arc<CustomerRegistry>,
    catalog: RewardCatalog,
    store: S,
    retry: RetryPolicy,
}

impl Engine<MemoryLedger> {
    /// Creates an engine backed by an empty in-memory store.
    pub fn new() -> Self {
        Self::with_store(MemoryLedger::new())
    }
}

impl Default for Engine<MemoryLedger> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: LedgerStore> Engine<S> {
    pub fn with_store(store: S) -> Self {
        Self {
            tenants: Arc::new(TenantRegistry::new()),
            customers: Arc::new(CustomerRegistry::new()),
            catalog: RewardCatalog::new(),
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn tenants(&self) -> &Arc<TenantRegistry> {
        &self.tenants
    }

    pub fn customers(&self) -> &Arc<CustomerRegistry> {
        &self.customers
    }

    pub fn catalog(&self) -> &RewardCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    fn ledger_key(&self, tenant_id: TenantId, customer_id: CustomerId) -> Result<LedgerKey, LedgerError> {
        if !self.tenants.contains(&tenant_id) {
            return Err(LedgerError::NotFound(Entity::Tenant));
        }
        if !self.customers.contains(&customer_id) {
            return Err(LedgerError::NotFound(Entity::Customer));
        }
        Ok(LedgerKey::new(tenant_id, customer_id))
    }

    /// Returns the ledger head: last entry id, balance and entry count.
    ///
    /// An empty ledger is a valid state with balance 0 and count 0.
    pub fn ledger_head(&self, tenant_id: TenantId, customer_id: CustomerId) -> Result<LedgerHead, LedgerError> {
        let key = self.ledger_key(tenant_id, customer_id)?;
        self.store.head(&key)
    }

    /// Current balance of `customer_id` with `tenant_id`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::NotFound`] if the tenant or the customer does not exist.
    pub fn resolve_balance(&self, tenant_id: TenantId, customer_id: CustomerId) -> Result<i64, LedgerError> {
        Ok(self.ledger_head(tenant_id, customer_id)?.balance)
    }

    pub fn balance_summary(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
    ) -> Result<BalanceSummary, LedgerError> {
        let key = self.ledger_key(tenant_id, customer_id)?;
        let history = self.store.history(&key)?;

        let (total_earned, total_redeemed) =
            history.iter().fold((0i64, 0i64), |(earned, redeemed), tx| match tx.kind {
                TransactionKind::PointsEarned => (earned + tx.points, redeemed),
                TransactionKind::RewardRedeemed => (earned, redeemed + tx.points.abs()),
            });

        Ok(BalanceSummary {
            tenant_id,
            balance: history.last().map_or(0, |tx| tx.resulting_balance),
            transaction_count: history.len(),
            total_earned,
            total_redeemed,
        })
    }

    /// Active rewards, cheapest first, annotated with tenant name and
    /// redemption counter.
    ///
    /// Rewards whose tenant is missing are listed under "Unknown".
    pub fn list_active_rewards(&self, tenant_id: Option<TenantId>) -> Result<Vec<CatalogEntry>, LedgerError> {
        self.catalog
            .active(tenant_id)
            .into_iter()
            .map(|reward| {
                Ok(CatalogEntry {
                    tenant_name: self.tenants.display_name(&reward.tenant_id),
                    redemption_count: self.store.redemption_count(reward.id)?,
                    reward,
                })
            })
            .collect()
    }

    /// Looks up a reward that a customer may redeem.
    ///
    /// Inactive rewards are reported as absent.
    pub fn redeemable_reward(&self, reward_id: RewardId) -> Result<Reward, LedgerError> {
        self.catalog
            .get(&reward_id)
            .filter(Reward::is_active)
            .ok_or(LedgerError::NotFound(Entity::Reward))
    }

    /// Spends points on a reward.
    ///
    /// Checks, first failure wins:
    /// 1. the reward exists and belongs to `tenant_id`, else `NotFound`;
    /// 2. the reward is active, else `NotFound`;
    /// 3. the tenant and the customer exist, else `NotFound`;
    /// 4. the balance covers the cost, else `InsufficientPoints` with the
    ///    shortfall.
    ///
    /// On success a `REWARD_REDEEMED` entry is appended and the reward's
    /// redemption counter incremented in one commit.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Conflict`] once the retry policy is exhausted.
    pub fn redeem(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
        reward_id: RewardId,
    ) -> Result<Transaction, LedgerError> {
        let reward = self
            .catalog
            .get(&reward_id)
            .filter(|reward| reward.tenant_id == tenant_id)
            .ok_or(LedgerError::NotFound(Entity::Reward))?;
        if !reward.is_active() {
            return Err(LedgerError::NotFound(Entity::Reward));
        }
        let key = self.ledger_key(tenant_id, customer_id)?;
        let cost = reward.points_required;

        for attempt in 1..=self.retry.max_attempts {
            let head = self.store.head(&key)?;
            if head.balance < cost {
                return Err(LedgerError::InsufficientPoints {
                    shortfall: cost - head.balance,
                });
            }

            let entry = NewEntry::redemption(reward.id, &reward.name, cost);
            match self.store.append(&key, Expectation::Head(head.last), entry) {
                Ok(transaction) => {
                    tracing::info!(
                        ledger = %key,
                        reward = %reward.id,
                        points = cost,
                        balance = transaction.resulting_balance,
                        "reward redeemed"
                    );
                    return Ok(transaction);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(ledger = %key, attempt, "redemption lost a race, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::warn!(
            ledger = %key,
            attempts = self.retry.max_attempts,
            "redemption retries exhausted"
        );
        Err(LedgerError::Conflict)
    }

    /// Appends a point-of-sale earning.
    ///
    /// Earnings are accepted as facts: no business rule beyond a positive
    /// amount is checked.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidPoints`] for a zero or negative amount.
    /// - [`LedgerError::NotFound`] if the tenant or the customer does not exist.
    pub fn record_earning(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
        points: i64,
        description: &str,
    ) -> Result<Transaction, LedgerError> {
        if points <= 0 {
            return Err(LedgerError::InvalidPoints);
        }
        let key = self.ledger_key(tenant_id, customer_id)?;

        let transaction = self
            .store
            .append(&key, Expectation::Any, NewEntry::earning(points, description))?;
        tracing::info!(
            ledger = %key,
            points,
            balance = transaction.resulting_balance,
            "points earned"
        );
        Ok(transaction)
    }

    /// Entries of one tenant-scoped ledger, oldest first.
    pub fn ledger_history(
        &self,
        tenant_id: TenantId,
        customer_id: CustomerId,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let key = self.ledger_key(tenant_id, customer_id)?;
        self.store.history(&key)
    }

    /// All entries of a customer across tenants, newest first.
    pub fn transactions(&self, customer_id: CustomerId) -> Result<Vec<Transaction>, LedgerError> {
        if !self.customers.contains(&customer_id) {
            return Err(LedgerError::NotFound(Entity::Customer));
        }
        self.store.customer_history(customer_id)
    }

    /// The `limit` most recent entries of a customer across tenants.
    pub fn recent_transactions(
        &self,
        customer_id: CustomerId,
        limit: usize,
    ) -> Result<Vec<Transaction>, LedgerError> {
        let mut transactions = self.transactions(customer_id)?;
        transactions.truncate(limit);
        Ok(transactions)
    }
}
