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

//! # Points Ledger
//!
//! This library provides a multi-tenant loyalty points engine: customers earn
//! points at participating businesses (tenants) and spend them on rewards
//! from each tenant's catalog.
//!
//! ## Core Components
//!
//! - [`Engine`]: Balance resolution, reward catalog, redemption and earning
//! - [`LedgerStore`]: Append-only per-(tenant, customer) ledger with compare-and-swap appends
//! - [`AccessGate`]: Maps bearer tokens and passwords to customers
//! - [`LedgerError`]: Error types for every operation
//! - [`api`]: REST boundary built on axum
//!
//! ## Example
//!
//! ```
//! use points_ledger::{Customer, CustomerId, CustomerStatus, Engine, Reward, RewardId,
//!     RewardStatus, Tenant, TenantId};
//!
//! let engine = Engine::new();
//! let cafe = TenantId::new_v4();
//! engine.tenants().upsert(Tenant::new(cafe, "Cafe Aurora"));
//!
//! let ana = CustomerId::new_v4();
//! engine.customers().upsert(Customer {
//!     id: ana,
//!     phone: "+5511900000001".into(),
//!     password_hash: String::new(),
//!     name: "Ana".into(),
//!     tenant_ids: [cafe].into(),
//!     status: CustomerStatus::Active,
//!     password_change_required: false,
//! }).unwrap();
//!
//! let espresso = RewardId::new_v4();
//! engine.catalog().upsert(Reward {
//!     id: espresso,
//!     tenant_id: cafe,
//!     name: "Espresso".into(),
//!     description: String::new(),
//!     points_required: 100,
//!     status: RewardStatus::Active,
//! }).unwrap();
//!
//! // Points are earned at the register
//! engine.record_earning(cafe, ana, 150, "Purchase").unwrap();
//!
//! // and spent on a reward
//! let tx = engine.redeem(cafe, ana, espresso).unwrap();
//! assert_eq!(tx.points, -100);
//! assert_eq!(engine.resolve_balance(cafe, ana).unwrap(), 50);
//! ```
//!
//! ## Thread Safety
//!
//! Each (tenant, customer) ledger has its own lock. Requests for different
//! pairs proceed in parallel; requests for the same pair are serialized on
//! the append, and redemptions retry a bounded number of times when they
//! lose a race.

pub mod api;
pub mod auth;
mod base;
pub mod catalog;
pub mod config;
pub mod customer;
mod engine;
pub mod error;
pub mod ledger;
pub mod seed;
pub mod store;
pub mod tenant;
mod transaction;

pub use auth::{AccessGate, TokenService};
pub use base::{CustomerId, LedgerKey, RewardId, TenantId, TransactionId};
pub use catalog::{CatalogEntry, Reward, RewardCatalog, RewardStatus};
pub use config::Config;
pub use customer::{Customer, CustomerRegistry, CustomerStatus};
pub use engine::{BalanceSummary, Engine, RetryPolicy};
pub use error::{Entity, LedgerError};
pub use ledger::{CustomerLedger, Expectation, LedgerHead};
pub use store::{LedgerStore, MemoryLedger};
pub use tenant::{Tenant, TenantRegistry};
pub use transaction::{NewEntry, Transaction, TransactionKind};
