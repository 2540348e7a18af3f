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

//! Reward catalog.
//!
//! Rewards are maintained by tenant-side tooling; from the ledger's point of
//! view they are read-only. The redemption counter is owned by the
//! [`LedgerStore`](crate::LedgerStore) so that it commits together with the
//! redemption entry.

use crate::base::{RewardId, TenantId};
use crate::LedgerError;
use crate::error::Entity;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RewardStatus {
    #[default]
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub id: RewardId,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: String,
    pub points_required: i64,
    pub status: RewardStatus,
}

impl Reward {
    pub fn is_active(&self) -> bool {
        self.status == RewardStatus::Active
    }
}

/// A reward as listed to customers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    #[serde(flatten)]
    pub reward: Reward,
    pub tenant_name: String,
    pub redemption_count: u64,
}

#[derive(Debug, Clone)]
struct CatalogRecord {
    reward: Reward,
    /// Insertion order; breaks ties between equal costs.
    position: u64,
}

#[derive(Debug, Default)]
pub struct RewardCatalog {
    rewards: DashMap<RewardId, CatalogRecord>,
    next_position: AtomicU64,
}

impl RewardCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a reward. A replaced reward keeps its position.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidInput`] for a negative point cost.
    pub fn upsert(&self, reward: Reward) -> Result<(), LedgerError> {
        if reward.points_required < 0 {
            return Err(LedgerError::InvalidInput(format!(
                "reward {} has a negative point cost",
                reward.id
            )));
        }

        self.rewards
            .entry(reward.id)
            .and_modify(|record| record.reward = reward.clone())
            .or_insert_with(|| CatalogRecord {
                reward: reward.clone(),
                position: self.next_position.fetch_add(1, Ordering::SeqCst),
            });
        Ok(())
    }

    pub fn get(&self, id: &RewardId) -> Option<Reward> {
        self.rewards.get(id).map(|r| r.reward.clone())
    }

    pub fn set_status(&self, id: &RewardId, status: RewardStatus) -> Result<(), LedgerError> {
        let mut record = self
            .rewards
            .get_mut(id)
            .ok_or(LedgerError::NotFound(Entity::Reward))?;
        record.reward.status = status;
        Ok(())
    }

    /// Active rewards, cheapest first, ties in insertion order.
    pub fn active(&self, tenant_id: Option<TenantId>) -> Vec<Reward> {
        let mut records: Vec<CatalogRecord> = self
            .rewards
            .iter()
            .filter(|r| r.reward.is_active())
            .filter(|r| tenant_id.is_none_or(|t| r.reward.tenant_id == t))
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| {
            a.reward
                .points_required
                .cmp(&b.reward.points_required)
                .then_with(|| a.position.cmp(&b.position))
        });
        records.into_iter().map(|r| r.reward).collect()
    }

    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }
}
