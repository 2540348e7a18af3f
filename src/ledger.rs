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

//! Per-(tenant, customer) ledger.
//!
//! A [`CustomerLedger`] is the append-only log for one [`LedgerKey`]. Its
//! mutex is the single-writer scope for that key: the compare-and-swap check,
//! the resulting-balance computation and the push all happen while it is held.
//!
//! # Example
//!
//! ```
//! use points_ledger::{CustomerId, CustomerLedger, LedgerKey, NewEntry, TenantId};
//!
//! let key = LedgerKey::new(TenantId::new_v4(), CustomerId::new_v4());
//! let ledger = CustomerLedger::new(key);
//! assert_eq!(ledger.balance(), 0);
//! ```

use crate::base::{LedgerKey, TransactionId};
use crate::transaction::{NewEntry, Transaction};
use crate::LedgerError;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Snapshot of a ledger's tail, used to validate and then conditionally append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LedgerHead {
    /// Id of the most recent entry, `None` for an empty ledger.
    pub last: Option<TransactionId>,
    /// Resulting balance of the most recent entry, 0 for an empty ledger.
    pub balance: i64,
    /// Number of entries.
    pub count: usize,
}

/// Append precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// Append regardless of what is at the tail.
    Any,
    /// Append only if the tail is still this entry (or still empty).
    Head(Option<TransactionId>),
}

#[derive(Debug)]
struct LedgerData {
    key: LedgerKey,
    entries: Vec<Arc<Transaction>>,
}

impl LedgerData {
    fn new(key: LedgerKey) -> Self {
        Self {
            key,
            entries: Vec::new(),
        }
    }

    fn head(&self) -> LedgerHead {
        match self.entries.last() {
            Some(last) => LedgerHead {
                last: Some(last.id),
                balance: last.resulting_balance,
                count: self.entries.len(),
            },
            None => LedgerHead::default(),
        }
    }

    fn assert_invariants(&self) {
        let mut running = 0i64;
        for entry in &self.entries {
            running = running.saturating_add(entry.points);
            debug_assert_eq!(
                entry.resulting_balance, running,
                "Invariant violated: entry {} on {} records balance {} but running sum is {}",
                entry.id, self.key, entry.resulting_balance, running
            );
        }
    }

    fn push(&mut self, entry: NewEntry, resulting_balance: i64, sequence: u64) -> Arc<Transaction> {
        let transaction = Arc::new(Transaction {
            id: TransactionId::new_v4(),
            tenant_id: self.key.tenant_id,
            customer_id: self.key.customer_id,
            kind: entry.kind,
            points: entry.points,
            reward_id: entry.reward_id,
            description: entry.description,
            resulting_balance,
            created_at: Utc::now(),
            sequence,
        });
        self.entries.push(Arc::clone(&transaction));
        if cfg!(debug_assertions) {
            self.assert_invariants();
        }
        transaction
    }
}

/// Append-only log of one tenant-scoped customer balance.
#[derive(Debug)]
pub struct CustomerLedger {
    inner: Mutex<LedgerData>,
}

impl CustomerLedger {
    pub fn new(key: LedgerKey) -> Self {
        Self {
            inner: Mutex::new(LedgerData::new(key)),
        }
    }

    pub fn key(&self) -> LedgerKey {
        self.inner.lock().key
    }

    /// Resulting balance of the last entry, or 0.
    pub fn balance(&self) -> i64 {
        self.inner.lock().head().balance
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn head(&self) -> LedgerHead {
        self.inner.lock().head()
    }

    /// Entries in append order.
    pub fn entries(&self) -> Vec<Arc<Transaction>> {
        self.inner.lock().entries.clone()
    }

    /// Appends `entry` if `expectation` still holds.
    ///
    /// `sequence` is called under the ledger lock so that sequence numbers
    /// follow append order within the ledger. `on_commit` runs under the same
    /// lock after the push; it must not fail.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::Conflict`] when the tail moved since the caller read it.
    /// - [`LedgerError::BalanceOverflow`] when the new balance does not fit in
    ///   an `i64`.
    ///
    /// On error nothing is written, `sequence` is not drawn and `on_commit`
    /// does not run.
    pub fn append(
        &self,
        expectation: Expectation,
        entry: NewEntry,
        sequence: impl FnOnce() -> u64,
        on_commit: impl FnOnce(&Transaction),
    ) -> Result<Arc<Transaction>, LedgerError> {
        let mut data = self.inner.lock();

        if let Expectation::Head(expected) = expectation
            && data.head().last != expected
        {
            return Err(LedgerError::Conflict);
        }

        let resulting_balance = data
            .head()
            .balance
            .checked_add(entry.points)
            .ok_or(LedgerError::BalanceOverflow)?;

        let transaction = data.push(entry, resulting_balance, sequence());
        on_commit(&transaction);
        Ok(transaction)
    }
}
