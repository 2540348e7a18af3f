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

//! Ledger entries.
//!
//! A [`NewEntry`] is what an engine asks the store to append; the store turns
//! it into an immutable [`Transaction`] by stamping an id, a timestamp, a
//! sequence number and the resulting balance.

use crate::base::{CustomerId, LedgerKey, RewardId, TenantId, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    PointsEarned,
    RewardRedeemed,
}

/// An appended ledger entry. Never modified after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: TransactionId,
    pub tenant_id: TenantId,
    pub customer_id: CustomerId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// Signed delta: positive for earnings, negative for redemptions.
    pub points: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward_id: Option<RewardId>,
    pub description: String,
    /// Balance of the (tenant, customer) ledger right after this entry.
    #[serde(rename = "balance")]
    pub resulting_balance: i64,
    pub created_at: DateTime<Utc>,
    /// Store-wide append order; breaks timestamp ties.
    pub sequence: u64,
}

impl Transaction {
    pub fn key(&self) -> LedgerKey {
        LedgerKey::new(self.tenant_id, self.customer_id)
    }
}

/// A ledger entry waiting to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub kind: TransactionKind,
    pub points: i64,
    pub reward_id: Option<RewardId>,
    pub description: String,
}

impl NewEntry {
    pub fn earning(points: i64, description: impl Into<String>) -> Self {
        Self {
            kind: TransactionKind::PointsEarned,
            points,
            reward_id: None,
            description: description.into(),
        }
    }

    /// A debit of `cost` points against `reward_id`.
    pub fn redemption(reward_id: RewardId, reward_name: &str, cost: i64) -> Self {
        Self {
            kind: TransactionKind::RewardRedeemed,
            points: -cost,
            reward_id: Some(reward_id),
            description: format!("Redeemed reward: {reward_name}"),
        }
    }
}
