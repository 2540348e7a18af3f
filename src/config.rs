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

//! Server configuration from environment variables.

use crate::engine::RetryPolicy;
use std::net::SocketAddr;
use thiserror::Error;

const DEVELOPMENT: &str = "development";
const MIN_SECRET_LEN: usize = 32;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// A secret is missing outside development.
    #[error("{name} must be set in {environment} environment")]
    MissingSecret { name: String, environment: String },

    /// A secret is shorter than the minimum length outside development.
    #[error("{name} must be at least {min} characters in {environment} environment")]
    WeakSecret {
        name: String,
        environment: String,
        min: usize,
    },

    /// A variable is set but cannot be parsed.
    #[error("invalid value for {name}: {value}")]
    Invalid { name: String, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Environment: development | staging | production
    pub environment: String,
    pub bind_addr: SocketAddr,
    /// HS256 signing secret for access tokens
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub token_ttl_minutes: i64,
    /// Shared value expected in `x-awd-app-signature`; unset disables the check
    pub app_signature: Option<String>,
    pub retry: RetryPolicy,
    pub bcrypt_cost: u32,
}

impl Config {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| DEVELOPMENT.into());

        let bcrypt_cost = parse_or(&lookup, "BCRYPT_COST", bcrypt::DEFAULT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::Invalid {
                name: "BCRYPT_COST".into(),
                value: bcrypt_cost.to_string(),
            });
        }

        Ok(Self {
            bind_addr: parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([127, 0, 0, 1], 8081)))?,
            jwt_secret: require_secret(&lookup, "JWT_SECRET", &environment)?,
            jwt_issuer: lookup("JWT_ISSUER")
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "points-ledger".into()),
            token_ttl_minutes: parse_or(&lookup, "TOKEN_TTL_MINUTES", 7 * 24 * 60)?,
            app_signature: lookup("APP_SIGNATURE").filter(|s| !s.is_empty()),
            retry: RetryPolicy::new(parse_or(
                &lookup,
                "REDEEM_MAX_ATTEMPTS",
                RetryPolicy::DEFAULT_MAX_ATTEMPTS,
            )?),
            bcrypt_cost,
            environment,
        })
    }

    pub fn is_development(&self) -> bool {
        self.environment == DEVELOPMENT
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name).filter(|s| !s.trim().is_empty()) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            name: name.into(),
            value,
        }),
    }
}

/// Secrets must be set and long enough outside development.
fn require_secret(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    environment: &str,
) -> Result<String, ConfigError> {
    let value = lookup(name).filter(|s| !s.is_empty());
    if environment == DEVELOPMENT {
        return Ok(value.unwrap_or_else(|| format!("dev-{name}-not-for-production-use-only")));
    }

    let value = value.ok_or_else(|| ConfigError::MissingSecret {
        name: name.into(),
        environment: environment.into(),
    })?;
    if value.len() < MIN_SECRET_LEN {
        return Err(ConfigError::WeakSecret {
            name: name.into(),
            environment: environment.into(),
            min: MIN_SECRET_LEN,
        });
    }
    Ok(value)
}
