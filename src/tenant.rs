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

//! Participating businesses.

use crate::base::TenantId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: TenantId,
    pub name: String,
    pub active: bool,
}

impl Tenant {
    pub fn new(id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            active: true,
        }
    }
}

/// Read-mostly tenant directory.
#[derive(Debug, Default)]
pub struct TenantRegistry {
    tenants: DashMap<TenantId, Tenant>,
}

impl TenantRegistry {
    /// Display name used for rewards whose tenant is missing.
    pub const UNKNOWN_NAME: &'static str = "Unknown";

    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a tenant.
    pub fn upsert(&self, tenant: Tenant) {
        self.tenants.insert(tenant.id, tenant);
    }

    pub fn get(&self, id: &TenantId) -> Option<Tenant> {
        self.tenants.get(id).map(|t| t.value().clone())
    }

    /// Inactive tenants still exist; balances and history stay readable.
    pub fn contains(&self, id: &TenantId) -> bool {
        self.tenants.contains_key(id)
    }

    pub fn display_name(&self, id: &TenantId) -> String {
        self.tenants
            .get(id)
            .map(|t| t.name.clone())
            .unwrap_or_else(|| Self::UNKNOWN_NAME.to_string())
    }

    /// All tenants ordered by name.
    pub fn list(&self) -> Vec<Tenant> {
        let mut tenants: Vec<Tenant> = self.tenants.iter().map(|t| t.value().clone()).collect();
        tenants.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        tenants
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}
