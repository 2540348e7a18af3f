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

use clap::{Parser, Subcommand};
use csv::{ReaderBuilder, Trim, Writer};
use points_ledger::api::{AppState, create_router};
use points_ledger::seed::Seed;
use points_ledger::{
    AccessGate, Config, CustomerId, Engine, LedgerKey, LedgerStore, TenantId, TokenService,
};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Points Ledger - Multi-tenant loyalty points engine
///
/// Serves the customer REST API, or replays point-of-sale earnings from a
/// CSV file and prints the resulting balances.
#[derive(Parser, Debug)]
#[command(name = "points-ledger")]
#[command(about = "A multi-tenant loyalty points ledger", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API
    Serve {
        /// Listen address, overrides BIND_ADDR
        #[arg(long, value_name = "ADDR")]
        bind: Option<SocketAddr>,

        /// JSON file with tenants, customers, rewards and opening earnings
        #[arg(long, value_name = "FILE")]
        seed: Option<PathBuf>,
    },
    /// Apply earnings from a CSV file and print balances to stdout
    ///
    /// Expected format: tenant,customer,points,description
    /// Example: points-ledger import --seed seed.json earnings.csv > balances.csv
    Import {
        /// JSON file declaring the tenants and customers referenced by the CSV
        #[arg(long, value_name = "FILE")]
        seed: PathBuf,

        /// Path to CSV file with earnings
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "points_ledger=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match args.command {
        Command::Serve { bind, seed } => serve(config, bind, seed.as_deref()).await,
        Command::Import { seed, input } => import(&config, &seed, &input),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn load_engine(config: &Config, seed: Option<&Path>) -> Result<Engine, Box<dyn Error>> {
    let engine = Engine::new().with_retry_policy(config.retry);
    if let Some(path) = seed {
        Seed::from_path(path)?.apply(&engine, config.bcrypt_cost)?;
    }
    Ok(engine)
}

async fn serve(config: Config, bind: Option<SocketAddr>, seed: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let engine = Arc::new(load_engine(&config, seed)?);

    let tokens = TokenService::new(
        config.jwt_secret.as_bytes(),
        config.jwt_issuer.clone(),
        chrono::Duration::minutes(config.token_ttl_minutes),
    );
    let gate = AccessGate::new(tokens, Arc::clone(engine.customers()), config.bcrypt_cost);

    if config.app_signature.is_none() {
        tracing::warn!("APP_SIGNATURE is not set, app signature check disabled");
    }
    let state = AppState {
        engine,
        gate: Arc::new(gate),
        app_signature: config.app_signature.as_deref().map(Arc::from),
    };

    let addr = bind.unwrap_or(config.bind_addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("points-ledger listening on {addr} (env: {})", config.environment);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

fn import(config: &Config, seed: &Path, input: &Path) -> Result<(), Box<dyn Error>> {
    let engine = load_engine(config, Some(seed))?;

    let file = File::open(input).map_err(|e| format!("cannot open '{}': {}", input.display(), e))?;
    let stats = import_earnings(&engine, BufReader::new(file))?;
    tracing::info!(applied = stats.applied, skipped = stats.skipped, "import finished");

    write_balances(&engine, std::io::stdout())
}

/// Raw CSV record matching the input format.
///
/// Fields: `tenant, customer, points, description`
#[derive(Debug, Deserialize)]
struct EarningRecord {
    tenant: TenantId,
    customer: CustomerId,
    points: i64,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportStats {
    pub applied: usize,
    pub skipped: usize,
}

/// Streams earnings from a CSV reader into the engine.
///
/// Malformed rows and rows the engine rejects (unknown tenant or customer,
/// non-positive points) are skipped and logged.
///
/// # CSV Format
///
/// ```csv
/// tenant,customer,points,description
/// 11111111-1111-4111-8111-111111111111,22222222-2222-4222-8222-222222222222,120,Lunch
/// ```
///
/// # Errors
///
/// Returns a CSV error only if the reader itself fails.
pub fn import_earnings<R: Read>(engine: &Engine, reader: R) -> Result<ImportStats, csv::Error> {
    let mut stats = ImportStats::default();

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true) // description is optional
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<EarningRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) if e.is_io_error() => return Err(e),
            Err(e) => {
                tracing::warn!(row = line + 1, "skipping malformed row: {e}");
                stats.skipped += 1;
                continue;
            }
        };

        let description = record.description.as_deref().unwrap_or("Purchase");
        match engine.record_earning(record.tenant, record.customer, record.points, description) {
            Ok(_) => stats.applied += 1,
            Err(e) => {
                tracing::warn!(row = line + 1, "skipping earning: {e}");
                stats.skipped += 1;
            }
        }
    }

    Ok(stats)
}

#[derive(Debug, Serialize)]
struct BalanceRow {
    tenant: TenantId,
    customer: CustomerId,
    balance: i64,
    transactions: usize,
}

/// Writes one row per non-empty ledger, ordered by tenant then customer.
///
/// Columns: `tenant, customer, balance, transactions`
pub fn write_balances<W: Write>(engine: &Engine, writer: W) -> Result<(), Box<dyn Error>> {
    let mut wtr = Writer::from_writer(writer);

    let mut keys: Vec<LedgerKey> = engine.store().keys();
    keys.sort_by_key(|key| (key.tenant_id, key.customer_id));

    for key in keys {
        let head = engine.store().head(&key)?;
        wtr.serialize(BalanceRow {
            tenant: key.tenant_id,
            customer: key.customer_id,
            balance: head.balance,
            transactions: head.count,
        })?;
    }

    wtr.flush()?;
    Ok(())
}
