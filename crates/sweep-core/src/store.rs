//! Postgres results store.
//!
//! One table, one row per probed address. The `ip` column is a signed 32-bit
//! `INT`; the codec in [`crate::addr`] does the bit-preserving
//! reinterpretation on the way in and out. Range selection is pushed into the
//! store (`oldest_range_anchor`) so the scanner carries no cursor across
//! restarts and stays safe to run against the same table from replicas.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgPool, Row};

use crate::addr;
use crate::batcher::MAX_WRITERS;
use crate::prober::Outcome;
use crate::ranges::RANGE_SIZE;

/// Connection parameters, assembled once at startup.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub address: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
    pub table: String,
}

/// The five operations the pipeline needs from a results store.
///
/// Failures surface unmodified; callers decide whether they are fatal
/// (initialisation) or absorbed (steady state).
#[async_trait]
pub trait ResultStore: Send + Sync + 'static {
    /// Liveness check.
    async fn ping(&self) -> Result<()>;

    /// Create the results table if absent.
    async fn ensure_schema(&self) -> Result<()>;

    /// Anchor of the /8 range with the oldest observation, unsigned form.
    /// Ranges with no stored row count as older than any present one.
    async fn oldest_range_anchor(&self) -> Result<u32>;

    /// Upsert every outcome in one atomic statement. A conflicting row gets
    /// its `ping` overwritten and its `timestamp` bumped to server time.
    async fn save(&self, outcomes: &[Outcome]) -> Result<()>;

    /// Release the connection pool.
    async fn close(&self);
}

pub struct PgStore {
    pool: PgPool,
    table: String,
}

impl PgStore {
    /// Open the connection pool. Fatal if it fails: there is nothing to scan
    /// into without a store.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let opts = PgConnectOptions::new()
            .host(&config.address)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(&config.database)
            .ssl_mode(PgSslMode::Disable);

        // Writer pool plus headroom for the range query and liveness checks.
        let pool = PgPoolOptions::new()
            .max_connections((MAX_WRITERS + 2) as u32)
            .connect_with(opts)
            .await
            .with_context(|| {
                format!(
                    "cannot connect to postgres at {}:{}",
                    config.address, config.port
                )
            })?;

        Ok(Self {
            pool,
            table: config.table.clone(),
        })
    }
}

#[async_trait]
impl ResultStore for PgStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(&schema_sql(&self.table))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn oldest_range_anchor(&self) -> Result<u32> {
        let row = sqlx::query(&oldest_anchor_sql(&self.table))
            .fetch_one(&self.pool)
            .await?;
        let anchor: i32 = row.try_get(0)?;
        Ok(addr::to_unsigned(anchor))
    }

    async fn save(&self, outcomes: &[Outcome]) -> Result<()> {
        if outcomes.is_empty() {
            return Ok(());
        }
        let sql = upsert_sql(&self.table, outcomes.len());
        let mut query = sqlx::query(&sql);
        for outcome in outcomes {
            query = query
                .bind(addr::to_signed(outcome.ip))
                .bind(outcome.reachable);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn schema_sql(table: &str) -> String {
    format!("CREATE TABLE IF NOT EXISTS {table} (ip INT PRIMARY KEY, ping BOOL, timestamp TIMESTAMP)")
}

/// Left-outer-join the 256 anchors against the stored rows; an absent anchor
/// row sorts before any present one (`NULLS FIRST`), and the trailing `range`
/// key breaks timestamp ties by anchor value ascending. Postgres sorts are
/// not stable, so the tie-break must be explicit.
///
/// The series start is cast to int4: the bare literal `-2147483648` types as
/// bigint (its digits exceed int4 max before the unary minus applies), which
/// would resolve `generate_series` to the int8 overload and hand back an
/// INT8 `range` column that an INT4 decode rejects.
fn oldest_anchor_sql(table: &str) -> String {
    format!(
        "SELECT range FROM generate_series(({min})::int4, {max}, {step}) AS range \
         LEFT OUTER JOIN {table} ON (range = ip) \
         ORDER BY timestamp NULLS FIRST, range LIMIT 1",
        min = i32::MIN,
        max = i32::MAX,
        step = RANGE_SIZE,
    )
}

/// Multi-row upsert with numbered placeholders, two binds per row:
/// `($1, $2, CURRENT_TIMESTAMP), ($3, $4, CURRENT_TIMESTAMP), …`.
/// At the full batch size this binds 65 534 parameters, just under the wire
/// protocol's 65 535 limit; that limit is why the batch capacity is 2¹⁵ − 1.
fn upsert_sql(table: &str, rows: usize) -> String {
    let mut values = String::with_capacity(rows * 28);
    for i in 0..rows {
        if i > 0 {
            values.push(',');
        }
        values.push_str(&format!("(${}, ${}, CURRENT_TIMESTAMP)", i * 2 + 1, i * 2 + 2));
    }
    format!(
        "INSERT INTO {table} (ip, ping, timestamp) VALUES {values} \
         ON CONFLICT (ip) DO UPDATE SET ping = excluded.ping, timestamp = CURRENT_TIMESTAMP"
    )
}
