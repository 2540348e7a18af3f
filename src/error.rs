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

//! Error types for ledger operations.

use std::fmt;
use thiserror::Error;

/// The kind of record a [`LedgerError::NotFound`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Tenant,
    Customer,
    Reward,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Entity::Tenant => "tenant",
            Entity::Customer => "customer",
            Entity::Reward => "reward",
        };
        f.write_str(name)
    }
}

/// Ledger processing errors.
///
/// Everything except [`LedgerError::Conflict`] and [`LedgerError::Internal`]
/// is deterministic: retrying the same request yields the same error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Bearer token is missing, malformed, expired or does not map to an active customer
    #[error("unauthenticated")]
    Unauthenticated,

    /// Login attempt with an unknown phone number or a wrong password
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Tenant, customer or reward is absent (inactive rewards count as absent)
    #[error("{0} not found")]
    NotFound(Entity),

    /// Balance is below the reward cost
    #[error("insufficient points: {shortfall} more points required")]
    InsufficientPoints { shortfall: i64 },

    /// Earning delta is zero or negative
    #[error("invalid points amount (must be positive)")]
    InvalidPoints,

    /// Appending the entry would push the balance past `i64::MAX`
    #[error("points amount would overflow the balance")]
    BalanceOverflow,

    /// Request payload failed validation
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Another writer appended to the same ledger first
    #[error("concurrent update on the same ledger")]
    Conflict,

    /// Storage failure or unexpected fault
    #[error("internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Returns `true` for errors the caller may resolve by resubmitting.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Conflict)
    }
}
