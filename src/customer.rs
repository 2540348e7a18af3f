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

//! Customer identities.
//!
//! A customer carries no balance: balances are tenant-scoped and live in the
//! ledger. Customers are never deleted, only suspended.

use crate::base::{CustomerId, TenantId};
use crate::LedgerError;
use crate::error::Entity;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CustomerStatus {
    #[default]
    Active,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: CustomerId,
    pub phone: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub tenant_ids: BTreeSet<TenantId>,
    pub status: CustomerStatus,
    pub password_change_required: bool,
}

impl Customer {
    pub fn is_active(&self) -> bool {
        self.status == CustomerStatus::Active
    }
}

/// Customer directory indexed by id and by phone number.
#[derive(Debug, Default)]
pub struct CustomerRegistry {
    customers: DashMap<CustomerId, Customer>,
    by_phone: DashMap<String, CustomerId>,
}

impl CustomerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a customer.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidInput`] if the phone number already
    /// belongs to a different customer.
    pub fn upsert(&self, customer: Customer) -> Result<(), LedgerError> {
        // Claim the phone number atomically; the shard guard is released
        // before the old number is removed.
        match self.by_phone.entry(customer.phone.clone()) {
            Entry::Occupied(owner) if *owner.get() != customer.id => {
                return Err(LedgerError::InvalidInput(format!(
                    "phone number {} is already registered",
                    customer.phone
                )));
            }
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                slot.insert(customer.id);
            }
        }

        let id = customer.id;
        if let Some(previous) = self.customers.insert(id, customer.clone())
            && previous.phone != customer.phone
        {
            self.by_phone.remove_if(&previous.phone, |_, owner| *owner == id);
        }
        Ok(())
    }

    pub fn get(&self, id: &CustomerId) -> Option<Customer> {
        self.customers.get(id).map(|c| c.value().clone())
    }

    pub fn contains(&self, id: &CustomerId) -> bool {
        self.customers.contains_key(id)
    }

    pub fn find_by_phone(&self, phone: &str) -> Option<Customer> {
        let id = *self.by_phone.get(phone.trim())?.value();
        self.get(&id)
    }

    /// Replaces the credential and clears the pending password-change flag.
    pub fn set_password_hash(&self, id: &CustomerId, hash: String) -> Result<(), LedgerError> {
        let mut customer = self
            .customers
            .get_mut(id)
            .ok_or(LedgerError::NotFound(Entity::Customer))?;
        customer.password_hash = hash;
        customer.password_change_required = false;
        Ok(())
    }

    pub fn set_status(&self, id: &CustomerId, status: CustomerStatus) -> Result<(), LedgerError> {
        let mut customer = self
            .customers
            .get_mut(id)
            .ok_or(LedgerError::NotFound(Entity::Customer))?;
        customer.status = status;
        Ok(())
    }

    /// Adds a tenant membership. Returns `false` if it was already present.
    pub fn join_tenant(&self, id: &CustomerId, tenant_id: TenantId) -> Result<bool, LedgerError> {
        let mut customer = self
            .customers
            .get_mut(id)
            .ok_or(LedgerError::NotFound(Entity::Customer))?;
        Ok(customer.tenant_ids.insert(tenant_id))
    }

    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }
}
