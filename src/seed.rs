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

//! JSON seed data.
//!
//! A seed file populates tenants, customers, rewards and opening earnings:
//!
//! ```json
//! {
//!   "tenants":   [{"id": "…", "name": "Cafe Aurora"}],
//!   "customers": [{"id": "…", "phone": "+5511…", "password": "…", "name": "Ana",
//!                  "tenantIds": ["…"]}],
//!   "rewards":   [{"id": "…", "tenantId": "…", "name": "Espresso", "pointsRequired": 100}],
//!   "earnings":  [{"tenantId": "…", "customerId": "…", "points": 150}]
//! }
//! ```
//!
//! Every array is optional. Plain-text passwords are hashed on load.

use crate::auth::hash_password;
use crate::base::{CustomerId, RewardId, TenantId};
use crate::catalog::{Reward, RewardStatus};
use crate::customer::{Customer, CustomerStatus};
use crate::engine::Engine;
use crate::store::MemoryLedger;
use crate::tenant::Tenant;
use crate::LedgerError;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::io::Read;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SeedError {
    #[error("failed to read seed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed seed: {0}")]
    Parse(#[from] serde_json::Error),

    /// A record was rejected by the engine.
    #[error("seed {record} rejected: {source}")]
    Rejected {
        record: String,
        #[source]
        source: LedgerError,
    },
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedTenant {
    pub id: TenantId,
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedCustomer {
    pub id: CustomerId,
    pub phone: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub tenant_ids: BTreeSet<TenantId>,
    #[serde(default)]
    pub status: CustomerStatus,
    #[serde(default)]
    pub password_change_required: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedReward {
    pub id: RewardId,
    pub tenant_id: TenantId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub points_required: i64,
    #[serde(default)]
    pub status: RewardStatus,
    #[serde(default)]
    pub redemption_count: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedEarning {
    pub tenant_id: TenantId,
    pub customer_id: CustomerId,
    pub points: i64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Seed {
    #[serde(default)]
    pub tenants: Vec<SeedTenant>,
    #[serde(default)]
    pub customers: Vec<SeedCustomer>,
    #[serde(default)]
    pub rewards: Vec<SeedReward>,
    #[serde(default)]
    pub earnings: Vec<SeedEarning>,
}

/// Counts of applied records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub tenants: usize,
    pub customers: usize,
    pub rewards: usize,
    pub earnings: usize,
}

impl Seed {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, SeedError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self, SeedError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Loads the seed into `engine`, hashing passwords with `hash_cost`.
    ///
    /// Records are applied in dependency order: tenants, customers, rewards,
    /// then earnings. The first rejected record aborts the load.
    pub fn apply(self, engine: &Engine<MemoryLedger>, hash_cost: u32) -> Result<SeedSummary, SeedError> {
        let mut summary = SeedSummary::default();

        for tenant in self.tenants {
            engine.tenants().upsert(Tenant {
                id: tenant.id,
                name: tenant.name,
                active: tenant.active,
            });
            summary.tenants += 1;
        }

        for customer in self.customers {
            let record = format!("customer {}", customer.id);
            let rejected = |source| SeedError::Rejected {
                record: record.clone(),
                source,
            };
            let password_hash = hash_password(&customer.password, hash_cost).map_err(rejected)?;
            engine
                .customers()
                .upsert(Customer {
                    id: customer.id,
                    phone: customer.phone.trim().to_string(),
                    password_hash,
                    name: customer.name,
                    tenant_ids: customer.tenant_ids,
                    status: customer.status,
                    password_change_required: customer.password_change_required,
                })
                .map_err(rejected)?;
            summary.customers += 1;
        }

        for reward in self.rewards {
            engine
                .catalog()
                .upsert(Reward {
                    id: reward.id,
                    tenant_id: reward.tenant_id,
                    name: reward.name,
                    description: reward.description,
                    points_required: reward.points_required,
                    status: reward.status,
                })
                .map_err(|source| SeedError::Rejected {
                    record: format!("reward {}", reward.id),
                    source,
                })?;
            if reward.redemption_count > 0 {
                engine.store().preload_redemptions(reward.id, reward.redemption_count);
            }
            summary.rewards += 1;
        }

        for earning in self.earnings {
            let description = earning.description.as_deref().unwrap_or("Opening balance");
            engine
                .record_earning(earning.tenant_id, earning.customer_id, earning.points, description)
                .map_err(|source| SeedError::Rejected {
                    record: format!("earning for {}/{}", earning.tenant_id, earning.customer_id),
                    source,
                })?;
            summary.earnings += 1;
        }

        tracing::info!(
            tenants = summary.tenants,
            customers = summary.customers,
            rewards = summary.rewards,
            earnings = summary.earnings,
            "seed loaded"
        );
        Ok(summary)
    }
}
