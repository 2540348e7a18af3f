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

//! Ledger storage.
//!
//! [`LedgerStore`] is the only component with write access to ledger entries.
//! [`MemoryLedger`] keeps one [`CustomerLedger`] per key in a [`DashMap`], so
//! appends to different keys never contend on a shared lock.

use crate::base::{CustomerId, LedgerKey, RewardId};
use crate::ledger::{CustomerLedger, Expectation, LedgerHead};
use crate::transaction::{NewEntry, Transaction};
use crate::LedgerError;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Durable append-only collection of ledger entries.
///
/// # Contract
///
/// - `append` computes the resulting balance from the previous entry of the
///   same key while holding that key's single-writer scope.
/// - With [`Expectation::Head`], `append` fails with [`LedgerError::Conflict`]
///   and writes nothing if the key's tail is no longer the expected entry.
/// - An entry with a `reward_id` bumps that reward's redemption counter in
///   the same commit.
/// - Entries are never edited or removed.
pub trait LedgerStore: Send + Sync {
    fn head(&self, key: &LedgerKey) -> Result<LedgerHead, LedgerError>;

    fn append(
        &self,
        key: &LedgerKey,
        expectation: Expectation,
        entry: NewEntry,
    ) -> Result<Transaction, LedgerError>;

    /// Entries of one ledger, oldest first.
    fn history(&self, key: &LedgerKey) -> Result<Vec<Transaction>, LedgerError>;

    /// Entries of a customer across all tenants, newest first.
    fn customer_history(&self, customer_id: CustomerId) -> Result<Vec<Transaction>, LedgerError>;

    fn redemption_count(&self, reward_id: RewardId) -> Result<u64, LedgerError>;
}

/// In-process [`LedgerStore`].
#[derive(Debug, Default)]
pub struct MemoryLedger {
    ledgers: DashMap<LedgerKey, Arc<CustomerLedger>>,
    redemptions: DashMap<RewardId, u64>,
    sequence: AtomicU64,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the starting redemption counter of a reward, e.g. from seed data.
    pub fn preload_redemptions(&self, reward_id: RewardId, count: u64) {
        self.redemptions.insert(reward_id, count);
    }

    /// Number of keys with at least one entry.
    pub fn ledger_count(&self) -> usize {
        self.ledgers.len()
    }

    /// Returns every ledger key with at least one entry.
    pub fn keys(&self) -> Vec<LedgerKey> {
        self.ledgers.iter().map(|entry| *entry.key()).collect()
    }

    fn get(&self, key: &LedgerKey) -> Option<Arc<CustomerLedger>> {
        self.ledgers.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the ledger for `key`, creating it if needed.
    ///
    /// The map shard guard is dropped before the caller locks the ledger.
    fn get_or_create(&self, key: &LedgerKey) -> Arc<CustomerLedger> {
        if let Some(ledger) = self.get(key) {
            return ledger;
        }
        let entry = self
            .ledgers
            .entry(*key)
            .or_insert_with(|| Arc::new(CustomerLedger::new(*key)));
        Arc::clone(entry.value())
    }
}

/// Orders by commit sequence, newest first. Wall-clock timestamps are not
/// monotonic and are not consulted.
fn sort_newest_first(transactions: &mut [Transaction]) {
    transactions.sort_unstable_by(|a, b| b.sequence.cmp(&a.sequence));
}

impl LedgerStore for MemoryLedger {
    fn head(&self, key: &LedgerKey) -> Result<LedgerHead, LedgerError> {
        Ok(self.get(key).map(|ledger| ledger.head()).unwrap_or_default())
    }

    fn append(
        &self,
        key: &LedgerKey,
        expectation: Expectation,
        entry: NewEntry,
    ) -> Result<Transaction, LedgerError> {
        let ledger = self.get_or_create(key);
        let transaction = ledger.append(
            expectation,
            entry,
            || self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            |committed| {
                if let Some(reward_id) = committed.reward_id {
                    *self.redemptions.entry(reward_id).or_insert(0) += 1;
                }
            },
        )?;
        Ok(Transaction::clone(&transaction))
    }

    fn history(&self, key: &LedgerKey) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self
            .get(key)
            .map(|ledger| ledger.entries().iter().map(|tx| Transaction::clone(tx)).collect())
            .unwrap_or_default())
    }

    fn customer_history(&self, customer_id: CustomerId) -> Result<Vec<Transaction>, LedgerError> {
        // Collect handles first so no shard guard is held while ledgers are locked.
        let ledgers: Vec<Arc<CustomerLedger>> = self
            .ledgers
            .iter()
            .filter(|entry| entry.key().customer_id == customer_id)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut transactions: Vec<Transaction> = ledgers
            .iter()
            .flat_map(|ledger| ledger.entries())
            .map(|tx| Transaction::clone(&tx))
            .collect();
        sort_newest_first(&mut transactions);
        Ok(transactions)
    }

    fn redemption_count(&self, reward_id: RewardId) -> Result<u64, LedgerError> {
        Ok(self
            .redemptions
            .get(&reward_id)
            .map(|count| *count.value())
            .unwrap_or(0))
    }
}

impl<S: LedgerStore + ?Sized> LedgerStore for Arc<S> {
    fn head(&self, key: &LedgerKey) -> Result<LedgerHead, LedgerError> {
        (**self).head(key)
    }

    fn append(
        &self,
        key: &LedgerKey,
        expectation: Expectation,
        entry: NewEntry,
    ) -> Result<Transaction, LedgerError> {
        (**self).append(key, expectation, entry)
    }

    fn history(&self, key: &LedgerKey) -> Result<Vec<Transaction>, LedgerError> {
        (**self).history(key)
    }

    fn customer_history(&self, customer_id: CustomerId) -> Result<Vec<Transaction>, LedgerError> {
        (**self).customer_history(customer_id)
    }

    fn redemption_count(&self, reward_id: RewardId) -> Result<u64, LedgerError> {
        (**self).redemption_count(reward_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::TenantId;

    fn key() -> LedgerKey {
        LedgerKey::new(TenantId::new_v4(), CustomerId::new_v4())
    }

    #[test]
    fn head_of_unknown_key_is_empty_and_not_created() {
        let store = MemoryLedger::new();
        assert_eq!(store.head(&key()).unwrap(), LedgerHead::default());
        assert_eq!(store.ledger_count(), 0);
    }

    #[test]
    fn sequence_numbers_increase() {
        let store = MemoryLedger::new();
        let k = key();
        let a = store.append(&k, Expectation::Any, NewEntry::earning(1, "a")).unwrap();
        let b = store.append(&key(), Expectation::Any, NewEntry::earning(1, "b")).unwrap();
        let c = store.append(&k, Expectation::Any, NewEntry::earning(1, "c")).unwrap();
        assert!(a.sequence < b.sequence);
        assert!(b.sequence < c.sequence);
    }

    #[test]
    fn redemption_bumps_counter_in_commit() {
        let store = MemoryLedger::new();
        let k = key();
        let reward = RewardId::new_v4();
        store.append(&k, Expectation::Any, NewEntry::earning(100, "a")).unwrap();
        store
            .append(&k, Expectation::Any, NewEntry::redemption(reward, "Coffee", 40))
            .unwrap();

        assert_eq!(store.redemption_count(reward).unwrap(), 1);
    }

    #[test]
    fn conflicting_redemption_does_not_bump_counter() {
        let store = MemoryLedger::new();
        let k = key();
        let reward = RewardId::new_v4();
        store.append(&k, Expectation::Any, NewEntry::earning(100, "a")).unwrap();

        let result = store.append(
            &k,
            Expectation::Head(None),
            NewEntry::redemption(reward, "Coffee", 40),
        );
        assert_eq!(result, Err(LedgerError::Conflict));
        assert_eq!(store.redemption_count(reward).unwrap(), 0);
    }

    #[test]
    fn preloaded_counter_is_incremented() {
        let store = MemoryLedger::new();
        let reward = RewardId::new_v4();
        store.preload_redemptions(reward, 12);
        store
            .append(&key(), Expectation::Any, NewEntry::redemption(reward, "Coffee", 0))
            .unwrap();
        assert_eq!(store.redemption_count(reward).unwrap(), 13);
    }

    #[test]
    fn customer_history_spans_tenants_newest_first() {
        let store = MemoryLedger::new();
        let customer = CustomerId::new_v4();
        let a = LedgerKey::new(TenantId::new_v4(), customer);
        let b = LedgerKey::new(TenantId::new_v4(), customer);

        store.append(&a, Expectation::Any, NewEntry::earning(1, "first")).unwrap();
        store.append(&b, Expectation::Any, NewEntry::earning(2, "second")).unwrap();
        store.append(&key(), Expectation::Any, NewEntry::earning(3, "other")).unwrap();
        store.append(&a, Expectation::Any, NewEntry::earning(4, "third")).unwrap();

        let history = store.customer_history(customer).unwrap();
        let descriptions: Vec<&str> = history.iter().map(|tx| tx.description.as_str()).collect();
        assert_eq!(descriptions, vec!["third", "second", "first"]);
    }

    #[test]
    fn newest_first_follows_sequence_not_clock() {
        let customer = CustomerId::new_v4();
        let k = LedgerKey::new(TenantId::new_v4(), customer);
        let now = chrono::Utc::now();
        let entry = |sequence: u64, created_at| Transaction {
            id: crate::base::TransactionId::new_v4(),
            tenant_id: k.tenant_id,
            customer_id: customer,
            kind: crate::transaction::TransactionKind::PointsEarned,
            points: 1,
            reward_id: None,
            description: format!("#{sequence}"),
            resulting_balance: sequence as i64,
            created_at,
            sequence,
        };

        // The clock stepped back between the first and second commit.
        let mut transactions = vec![
            entry(1, now),
            entry(2, now - chrono::Duration::seconds(30)),
            entry(3, now - chrono::Duration::seconds(10)),
        ];
        sort_newest_first(&mut transactions);

        let order: Vec<u64> = transactions.iter().map(|tx| tx.sequence).collect();
        assert_eq!(order, vec![3, 2, 1]);
    }
}
