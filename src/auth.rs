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

//! Access control.
//!
//! Access tokens are HS256 JWTs whose subject is a customer id. A token maps
//! to exactly one customer or is rejected with
//! [`LedgerError::Unauthenticated`]; there is no default identity.
//!
//! Password hashing and verification use bcrypt and are CPU bound. Async
//! callers should run [`AccessGate::login`] and
//! [`AccessGate::change_password`] on a blocking thread.

use crate::base::CustomerId;
use crate::customer::{Customer, CustomerRegistry};
use crate::LedgerError;
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shortest password accepted by [`AccessGate::change_password`].
pub const MIN_PASSWORD_LEN: usize = 8;

/// Hashed on construction and verified against when a login names an unknown
/// phone number, so misses cost as much as hits.
const DUMMY_PASSWORD: &str = "points-ledger-unknown-customer";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Customer id
    pub sub: String,
    pub iss: String,
    /// Issued at (Unix timestamp seconds)
    pub iat: u64,
    /// Expiration (Unix timestamp seconds)
    pub exp: u64,
}

/// Mints and verifies access tokens.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl: Duration,
}

impl TokenService {
    pub fn new(secret: &[u8], issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            issuer: issuer.into(),
            ttl,
        }
    }

    pub fn issue(&self, customer_id: CustomerId) -> Result<String, LedgerError> {
        let now = Utc::now();
        let claims = Claims {
            sub: customer_id.to_string(),
            iss: self.issuer.clone(),
            iat: now.timestamp().max(0) as u64,
            exp: (now + self.ttl).timestamp().max(0) as u64,
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| LedgerError::Internal(format!("token signing failed: {e}")))
    }

    /// Checks signature, issuer and expiry, then parses the subject.
    pub fn verify(&self, token: &str) -> Result<CustomerId, LedgerError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);

        let data = jsonwebtoken::decode::<Claims>(token.trim(), &self.decoding, &validation)
            .map_err(|e| {
                tracing::debug!("token rejected: {e}");
                LedgerError::Unauthenticated
            })?;

        data.claims
            .sub
            .parse()
            .map_err(|_| LedgerError::Unauthenticated)
    }
}

/// Successful login.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub customer: Customer,
}

/// Maps credentials to customers.
pub struct AccessGate {
    tokens: TokenService,
    customers: Arc<CustomerRegistry>,
    hash_cost: u32,
    dummy_hash: Option<String>,
}

impl AccessGate {
    pub fn new(tokens: TokenService, customers: Arc<CustomerRegistry>, hash_cost: u32) -> Self {
        let dummy_hash = hash_password(DUMMY_PASSWORD, hash_cost)
            .inspect_err(|e| tracing::warn!("cannot prepare login timing guard: {e}"))
            .ok();
        Self {
            tokens,
            customers,
            hash_cost,
            dummy_hash,
        }
    }

    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Resolves a bearer token to an active customer.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Unauthenticated`] for a token that does not verify or
    /// whose customer is unknown or suspended.
    pub fn authenticate(&self, token: &str) -> Result<CustomerId, LedgerError> {
        let customer_id = self.tokens.verify(token)?;
        match self.customers.get(&customer_id) {
            Some(customer) if customer.is_active() => Ok(customer_id),
            _ => Err(LedgerError::Unauthenticated),
        }
    }

    /// Verifies a phone number and password and mints a token.
    ///
    /// Unknown phone numbers, wrong passwords and suspended customers all
    /// fail with [`LedgerError::InvalidCredentials`].
    pub fn login(&self, phone: &str, password: &str) -> Result<Session, LedgerError> {
        let Some(customer) = self.customers.find_by_phone(phone) else {
            if let Some(hash) = &self.dummy_hash {
                let _ = bcrypt::verify(password, hash);
            }
            return Err(LedgerError::InvalidCredentials);
        };

        let valid = bcrypt::verify(password, &customer.password_hash).unwrap_or_else(|e| {
            tracing::warn!(customer = %customer.id, "stored password hash is unusable: {e}");
            false
        });
        if !valid || !customer.is_active() {
            return Err(LedgerError::InvalidCredentials);
        }

        let token = self.tokens.issue(customer.id)?;
        tracing::info!(customer = %customer.id, "customer logged in");
        Ok(Session { token, customer })
    }

    pub fn change_password(&self, customer_id: CustomerId, new_password: &str) -> Result<(), LedgerError> {
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(LedgerError::InvalidInput(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        let hash = hash_password(new_password, self.hash_cost)?;
        self.customers.set_password_hash(&customer_id, hash)?;
        tracing::info!(customer = %customer_id, "password changed");
        Ok(())
    }
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, LedgerError> {
    bcrypt::hash(password, cost).map_err(|e| LedgerError::Internal(format!("password hashing failed: {e}")))
}
