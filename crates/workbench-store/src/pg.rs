//! Postgres store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};
use workbench_core::{
    check_limit, AnalysisKind, AnalysisRun, AnalysisRunFilter, BalanceSnapshot, Bar, BarCoverage,
    ClosedDeal, NewAnalysisRun, NewStlRun, NewsArticle, NewsStats, SignalTrade, StlPoint, StlRun,
    Store, StoreError, StoreErrorKind, Timeframe,
};

/// Schema shipped with the crate.
pub const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

/// Rows per multi-row INSERT statement.
const BATCH_ROWS: usize = 1000;

fn db_err(err: sqlx::Error) -> StoreError {
    let kind = match &err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => StoreErrorKind::Connection,
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::TypeNotFound { .. } => StoreErrorKind::Decode,
        sqlx::Error::Configuration(_) => StoreErrorKind::Connection,
        _ => StoreErrorKind::Query,
    };
    StoreError::new(kind, err.to_string())
}

fn decode_err(message: String) -> StoreError {
    StoreError::new(StoreErrorKind::Decode, message)
}

fn parse_timeframe(s: &str) -> Result<Timeframe, StoreError> {
    s.parse::<Timeframe>().map_err(decode_err)
}

#[derive(FromRow)]
struct BarRow {
    symbol: String,
    timeframe: String,
    ts: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    tick_volume: Option<i64>,
    spread: Option<i32>,
    real_volume: Option<i64>,
}

impl TryFrom<BarRow> for Bar {
    type Error = StoreError;

    fn try_from(row: BarRow) -> Result<Self, Self::Error> {
        Ok(Bar {
            symbol: row.symbol,
            timeframe: parse_timeframe(&row.timeframe)?,
            ts: row.ts,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            tick_volume: row.tick_volume,
            spread: row.spread,
            real_volume: row.real_volume,
        })
    }
}

#[derive(FromRow)]
struct StlRunRow {
    id: i64,
    symbol: String,
    timeframe: String,
    period: i32,
    start_ts: DateTime<Utc>,
    end_ts: DateTime<Utc>,
    rows_count: i64,
    created_at: DateTime<Utc>,
}

impl TryFrom<StlRunRow> for StlRun {
    type Error = StoreError;

    fn try_from(row: StlRunRow) -> Result<Self, Self::Error> {
        Ok(StlRun {
            id: row.id,
            symbol: row.symbol,
            timeframe: parse_timeframe(&row.timeframe)?,
            period: row.period,
            start_ts: row.start_ts,
            end_ts: row.end_ts,
            rows_count: row.rows_count,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct StlPointRow {
    ts: DateTime<Utc>,
    close: f64,
    trend: f64,
    seasonal: f64,
    resid: f64,
}

#[derive(FromRow)]
struct NewsRow {
    symbol: String,
    url: String,
    title: String,
    source: Option<String>,
    published_at: Option<DateTime<Utc>>,
    body: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct BalanceRow {
    user_name: String,
    account_id: i64,
    ts: DateTime<Utc>,
    balance: Decimal,
    equity: Decimal,
    margin: Decimal,
    free_margin: Decimal,
    currency: String,
}

impl From<BalanceRow> for BalanceSnapshot {
    fn from(row: BalanceRow) -> Self {
        BalanceSnapshot {
            user: row.user_name,
            account_id: row.account_id,
            ts: row.ts,
            balance: row.balance,
            equity: row.equity,
            margin: row.margin,
            free_margin: row.free_margin,
            currency: row.currency,
        }
    }
}

#[derive(FromRow)]
struct DealRow {
    deal_id: i64,
    ts: DateTime<Utc>,
    symbol: String,
    profit: Decimal,
    commission: Decimal,
    swap: Decimal,
    volume: Decimal,
    entry: i32,
    order_id: i64,
    comment: String,
}

#[derive(FromRow)]
struct AnalysisRunRow {
    id: i64,
    kind: String,
    symbol: String,
    base_ccy: Option<String>,
    quote_ccy: Option<String>,
    strategy: String,
    created_at: DateTime<Utc>,
    news_ids: Vec<String>,
    answers_json: Value,
}

impl TryFrom<AnalysisRunRow> for AnalysisRun {
    type Error = StoreError;

    fn try_from(row: AnalysisRunRow) -> Result<Self, Self::Error> {
        Ok(AnalysisRun {
            id: row.id,
            kind: row.kind.parse::<AnalysisKind>().map_err(decode_err)?,
            symbol: row.symbol,
            base_ccy: row.base_ccy,
            quote_ccy: row.quote_ccy,
            strategy: row.strategy,
            created_at: row.created_at,
            news_ids: row.news_ids,
            answers_json: row.answers_json,
        })
    }
}

const BAR_COLUMNS: &str =
    "symbol, timeframe, ts, open, high, low, close, tick_volume, spread, real_volume";
const STL_RUN_COLUMNS: &str =
    "id, symbol, timeframe, period, start_ts, end_ts, rows_count, created_at";
const NEWS_COLUMNS: &str = "symbol, url, title, source, published_at, body, created_at";
const BALANCE_COLUMNS: &str =
    "user_name, account_id, ts, balance, equity, margin, free_margin, currency";
const DEAL_COLUMNS: &str =
    "deal_id, ts, symbol, profit, commission, swap, volume, entry, order_id, comment";
const RUN_COLUMNS: &str =
    "id, kind, symbol, base_ccy, quote_ccy, strategy, created_at, news_ids, answers_json";

/// Keep the last occurrence of each key; Postgres rejects a multi-row
/// upsert that touches the same row twice.
fn dedupe_last<'a, T, K, F>(rows: &'a [T], key: F) -> Vec<&'a T>
where
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut index: HashMap<K, usize> = HashMap::with_capacity(rows.len());
    let mut out: Vec<&T> = Vec::with_capacity(rows.len());
    for row in rows {
        match index.get(&key(row)) {
            Some(&i) => out[i] = row,
            None => {
                index.insert(key(row), out.len());
                out.push(row);
            }
        }
    }
    out
}

/// Store backed by a Postgres connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect a pool of `min..=max` connections.
    pub async fn connect(dsn: &str, min_connections: u32, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(min_connections)
            .max_connections(max_connections.max(min_connections).max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect(dsn)
            .await
            .map_err(db_err)?;
        info!(min_connections, max_connections, "Connected to Postgres");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the schema. An external file replaces the embedded one.
    pub async fn init_schema(&self, path: Option<&Path>) -> Result<(), StoreError> {
        let sql = match path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                StoreError::new(
                    StoreErrorKind::Schema,
                    format!("cannot read {}: {}", path.display(), e),
                )
            })?,
            None => SCHEMA_SQL.to_string(),
        };
        sqlx::raw_sql(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::new(StoreErrorKind::Schema, e.to_string()))?;
        info!(external = path.is_some(), "Schema initialized");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_bars(&self, rows: &[Bar]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let unique = dedupe_last(rows, |b| (b.symbol.clone(), b.timeframe, b.ts));

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for chunk in unique.chunks(BATCH_ROWS) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO ohlc_bars ({}) ", BAR_COLUMNS));
            qb.push_values(chunk, |mut b, bar| {
                b.push_bind(bar.symbol.as_str())
                    .push_bind(bar.timeframe.as_str())
                    .push_bind(bar.ts)
                    .push_bind(bar.open)
                    .push_bind(bar.high)
                    .push_bind(bar.low)
                    .push_bind(bar.close)
                    .push_bind(bar.tick_volume)
                    .push_bind(bar.spread)
                    .push_bind(bar.real_volume);
            });
            qb.push(
                " ON CONFLICT (symbol, timeframe, ts) DO UPDATE SET \
                 open = EXCLUDED.open, high = EXCLUDED.high, low = EXCLUDED.low, \
                 close = EXCLUDED.close, tick_volume = EXCLUDED.tick_volume, \
                 spread = EXCLUDED.spread, real_volume = EXCLUDED.real_volume",
            );
            qb.build().execute(&mut *tx).await.map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        debug!(rows = rows.len(), unique = unique.len(), "Upserted bars");
        Ok(rows.len())
    }

    async fn fetch_bars(&self, symbol: &str, timeframe: Timeframe, limit: i64) -> Result<Vec<Bar>, StoreError> {
        check_limit(limit)?;
        let sql = format!(
            "SELECT * FROM (SELECT {} FROM ohlc_bars WHERE symbol = $1 AND timeframe = $2 \
             ORDER BY ts DESC LIMIT $3) t ORDER BY ts ASC",
            BAR_COLUMNS
        );
        let rows: Vec<BarRow> = sqlx::query_as(&sql)
            .bind(symbol)
            .bind(timeframe.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Bar::try_from).collect()
    }

    async fn fetch_bars_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, StoreError> {
        let sql = format!(
            "SELECT {} FROM ohlc_bars WHERE symbol = $1 AND timeframe = $2 \
             AND ts >= $3 AND ts <= $4 ORDER BY ts ASC",
            BAR_COLUMNS
        );
        let rows: Vec<BarRow> = sqlx::query_as(&sql)
            .bind(symbol)
            .bind(timeframe.as_str())
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Bar::try_from).collect()
    }

    async fn ohlc_range(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<BarCoverage>, StoreError> {
        let (start, end, count): (Option<DateTime<Utc>>, Option<DateTime<Utc>>, i64) = sqlx::query_as(
            "SELECT MIN(ts), MAX(ts), COUNT(*) FROM ohlc_bars WHERE symbol = $1 AND timeframe = $2",
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(match (start, end) {
            (Some(start_ts), Some(end_ts)) if count > 0 => Some(BarCoverage {
                start_ts,
                end_ts,
                rows_count: count,
            }),
            _ => None,
        })
    }

    async fn latest_bar_ts(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<DateTime<Utc>>, StoreError> {
        let (latest,): (Option<DateTime<Utc>>,) =
            sqlx::query_as("SELECT MAX(ts) FROM ohlc_bars WHERE symbol = $1 AND timeframe = $2")
                .bind(symbol)
                .bind(timeframe.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(latest)
    }

    async fn count_bars_after(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        after: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM ohlc_bars WHERE symbol = $1 AND timeframe = $2 AND ts > $3",
        )
        .bind(symbol)
        .bind(timeframe.as_str())
        .bind(after)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(count)
    }

    async fn create_stl_run(&self, run: &NewStlRun, points: &[StlPoint]) -> Result<StlRun, StoreError> {
        let unique = dedupe_last(points, |p| p.ts);

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let sql = format!(
            "INSERT INTO stl_runs (symbol, timeframe, period, start_ts, end_ts, rows_count) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            STL_RUN_COLUMNS
        );
        let row: StlRunRow = sqlx::query_as(&sql)
            .bind(&run.symbol)
            .bind(run.timeframe.as_str())
            .bind(run.period)
            .bind(run.start_ts)
            .bind(run.end_ts)
            .bind(unique.len() as i64)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

        for chunk in unique.chunks(BATCH_ROWS) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO stl_components (run_id, ts, close, trend, seasonal, resid) ",
            );
            qb.push_values(chunk, |mut b, p| {
                b.push_bind(row.id)
                    .push_bind(p.ts)
                    .push_bind(p.close)
                    .push_bind(p.trend)
                    .push_bind(p.seasonal)
                    .push_bind(p.resid);
            });
            qb.build().execute(&mut *tx).await.map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;

        StlRun::try_from(row)
    }

    async fn list_stl_runs(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<StlRun>, StoreError> {
        let sql = format!(
            "SELECT {} FROM stl_runs WHERE symbol = $1 AND timeframe = $2 \
             ORDER BY created_at DESC, id DESC",
            STL_RUN_COLUMNS
        );
        let rows: Vec<StlRunRow> = sqlx::query_as(&sql)
            .bind(symbol)
            .bind(timeframe.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(StlRun::try_from).collect()
    }

    async fn get_stl_run(&self, id: i64) -> Result<Option<StlRun>, StoreError> {
        let sql = format!("SELECT {} FROM stl_runs WHERE id = $1", STL_RUN_COLUMNS);
        let row: Option<StlRunRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(StlRun::try_from).transpose()
    }

    async fn fetch_stl_run_data(&self, id: i64) -> Result<Vec<StlPoint>, StoreError> {
        let rows: Vec<StlPointRow> = sqlx::query_as(
            "SELECT ts, close, trend, seasonal, resid FROM stl_components \
             WHERE run_id = $1 ORDER BY ts ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|r| StlPoint {
                ts: r.ts,
                close: r.close,
                trend: r.trend,
                seasonal: r.seasonal,
                resid: r.resid,
            })
            .collect())
    }

    async fn delete_stl_run(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM stl_runs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_news_articles(&self, rows: &[NewsArticle]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let unique = dedupe_last(rows, |a| (a.symbol.clone(), a.url.clone()));

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for chunk in unique.chunks(BATCH_ROWS) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO news_articles ({}) ", NEWS_COLUMNS));
            qb.push_values(chunk, |mut b, a| {
                b.push_bind(a.symbol.as_str())
                    .push_bind(a.url.as_str())
                    .push_bind(a.title.as_str())
                    .push_bind(a.source.as_deref())
                    .push_bind(a.published_at)
                    .push_bind(a.body.as_deref())
                    .push_bind(a.created_at);
            });
            qb.push(
                " ON CONFLICT (symbol, url) DO UPDATE SET title = EXCLUDED.title, \
                 source = EXCLUDED.source, published_at = EXCLUDED.published_at, \
                 body = EXCLUDED.body",
            );
            qb.build().execute(&mut *tx).await.map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(rows.len())
    }

    async fn fetch_news_db(
        &self,
        symbol: &str,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<NewsArticle>, StoreError> {
        check_limit(limit)?;
        let sql = format!(
            "SELECT {} FROM news_articles WHERE symbol = $1 \
             AND ($2::timestamptz IS NULL OR COALESCE(published_at, created_at) >= $2) \
             ORDER BY COALESCE(published_at, created_at) DESC LIMIT $3",
            NEWS_COLUMNS
        );
        let rows: Vec<NewsRow> = sqlx::query_as(&sql)
            .bind(symbol)
            .bind(since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|r| NewsArticle {
                symbol: r.symbol,
                url: r.url,
                title: r.title,
                source: r.source,
                published_at: r.published_at,
                body: r.body,
                created_at: r.created_at,
            })
            .collect())
    }

    async fn news_stats(&self, symbol: &str, baseline: Option<DateTime<Utc>>) -> Result<NewsStats, StoreError> {
        let (total, latest_at, newer): (i64, Option<DateTime<Utc>>, i64) = sqlx::query_as(
            "SELECT COUNT(*), MAX(COALESCE(published_at, created_at)), \
             COUNT(*) FILTER (WHERE $2::timestamptz IS NULL \
                              OR COALESCE(published_at, created_at) > $2) \
             FROM news_articles WHERE symbol = $1",
        )
        .bind(symbol)
        .bind(baseline)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(NewsStats {
            total,
            latest_at,
            newer_than_baseline: newer,
        })
    }

    async fn latest_news_ts_for_urls(&self, symbol: &str, urls: &[String]) -> Result<Option<DateTime<Utc>>, StoreError> {
        if urls.is_empty() {
            return Ok(None);
        }
        let (latest,): (Option<DateTime<Utc>>,) = sqlx::query_as(
            "SELECT MAX(COALESCE(published_at, created_at)) FROM news_articles \
             WHERE symbol = $1 AND url = ANY($2)",
        )
        .bind(symbol)
        .bind(urls)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(latest)
    }

    async fn insert_balance_snapshot(&self, snapshot: &BalanceSnapshot) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO account_balances ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (user_name, account_id, ts) DO NOTHING",
            BALANCE_COLUMNS
        );
        sqlx::query(&sql)
            .bind(&snapshot.user)
            .bind(snapshot.account_id)
            .bind(snapshot.ts)
            .bind(snapshot.balance)
            .bind(snapshot.equity)
            .bind(snapshot.margin)
            .bind(snapshot.free_margin)
            .bind(&snapshot.currency)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_balance_snapshots(
        &self,
        user: &str,
        account_id: Option<i64>,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<BalanceSnapshot>, StoreError> {
        check_limit(limit)?;
        let sql = format!(
            "SELECT * FROM (SELECT {} FROM account_balances WHERE user_name = $1 \
             AND ($2::bigint IS NULL OR account_id = $2) \
             AND ($3::timestamptz IS NULL OR ts >= $3) \
             ORDER BY ts DESC LIMIT $4) t ORDER BY ts ASC",
            BALANCE_COLUMNS
        );
        let rows: Vec<BalanceRow> = sqlx::query_as(&sql)
            .bind(user)
            .bind(account_id)
            .bind(since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(BalanceSnapshot::from).collect())
    }

    async fn latest_balance_at_or_before(
        &self,
        user: &str,
        account_id: i64,
        ts: DateTime<Utc>,
    ) -> Result<Option<BalanceSnapshot>, StoreError> {
        let sql = format!(
            "SELECT {} FROM account_balances WHERE user_name = $1 AND account_id = $2 \
             AND ts <= $3 ORDER BY ts DESC LIMIT 1",
            BALANCE_COLUMNS
        );
        let row: Option<BalanceRow> = sqlx::query_as(&sql)
            .bind(user)
            .bind(account_id)
            .bind(ts)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(BalanceSnapshot::from))
    }

    async fn upsert_closed_deals(&self, account_id: i64, rows: &[ClosedDeal]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let unique = dedupe_last(rows, |d| d.deal_id);

        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for chunk in unique.chunks(BATCH_ROWS) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO closed_deals (account_id, {}) ",
                DEAL_COLUMNS
            ));
            qb.push_values(chunk, |mut b, d| {
                b.push_bind(account_id)
                    .push_bind(d.deal_id)
                    .push_bind(d.ts)
                    .push_bind(d.symbol.as_str())
                    .push_bind(d.profit)
                    .push_bind(d.commission)
                    .push_bind(d.swap)
                    .push_bind(d.volume)
                    .push_bind(d.entry)
                    .push_bind(d.order)
                    .push_bind(d.comment.as_str());
            });
            qb.push(
                " ON CONFLICT (account_id, deal_id) DO UPDATE SET ts = EXCLUDED.ts, \
                 symbol = EXCLUDED.symbol, profit = EXCLUDED.profit, \
                 commission = EXCLUDED.commission, swap = EXCLUDED.swap, \
                 volume = EXCLUDED.volume, entry = EXCLUDED.entry, \
                 order_id = EXCLUDED.order_id, comment = EXCLUDED.comment",
            );
            qb.build().execute(&mut *tx).await.map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        Ok(rows.len())
    }

    async fn list_closed_deals(
        &self,
        account_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ClosedDeal>, StoreError> {
        let sql = format!(
            "SELECT {} FROM closed_deals WHERE account_id = $1 AND ts >= $2 AND ts <= $3 \
             ORDER BY ts ASC, deal_id ASC",
            DEAL_COLUMNS
        );
        let rows: Vec<DealRow> = sqlx::query_as(&sql)
            .bind(account_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|r| ClosedDeal {
                deal_id: r.deal_id,
                ts: r.ts,
                symbol: r.symbol,
                profit: r.profit,
                commission: r.commission,
                swap: r.swap,
                volume: r.volume,
                entry: r.entry,
                order: r.order_id,
                comment: r.comment,
            })
            .collect())
    }

    async fn set_prefs(&self, prefs: &HashMap<String, String>) -> Result<(), StoreError> {
        if prefs.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        for (key, value) in prefs {
            sqlx::query(
                "INSERT INTO app_preferences (key, value) VALUES ($1, $2) \
                 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)
    }

    async fn get_prefs(&self, keys: &[&str]) -> Result<HashMap<String, String>, StoreError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM app_preferences WHERE key = ANY($1)")
                .bind(&keys)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(rows.into_iter().collect())
    }

    async fn insert_signal_trade(&self, trade: &SignalTrade) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO signal_trades (ts, symbol, strategy, side, volume, price, sl, tp, retcode, comment) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING id",
        )
        .bind(trade.ts)
        .bind(&trade.symbol)
        .bind(&trade.strategy)
        .bind(trade.side.to_string())
        .bind(trade.volume)
        .bind(trade.price)
        .bind(trade.sl)
        .bind(trade.tp)
        .bind(trade.retcode)
        .bind(trade.comment.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(id)
    }

    async fn insert_health_run(&self, run: &NewAnalysisRun) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO analysis_runs (kind, symbol, base_ccy, quote_ccy, strategy, created_at, news_ids, answers_json) \
             VALUES ($1, $2, $3, $4, $5, COALESCE($6, now()), $7, $8) RETURNING id",
        )
        .bind(run.kind.as_str())
        .bind(&run.symbol)
        .bind(run.base_ccy.as_deref())
        .bind(run.quote_ccy.as_deref())
        .bind(&run.strategy)
        .bind(run.created_at)
        .bind(&run.news_ids)
        .bind(&run.answers_json)
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(id)
    }

    async fn list_health_runs(
        &self,
        filter: &AnalysisRunFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AnalysisRun>, StoreError> {
        check_limit(limit)?;
        if offset < 0 {
            return Err(StoreError::invalid_argument("offset must be >= 0"));
        }

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM analysis_runs WHERE TRUE", RUN_COLUMNS));
        if let Some(kind) = filter.kind {
            qb.push(" AND kind = ").push_bind(kind.as_str());
        }
        if let Some(strategy) = &filter.strategy {
            qb.push(" AND strategy = ").push_bind(strategy.as_str());
        }
        if let Some(symbol) = &filter.symbol {
            qb.push(" AND (UPPER(symbol) = UPPER(").push_bind(symbol.as_str()).push(")");
            if let (Some(base), Some(quote)) = (&filter.base, &filter.quote) {
                qb.push(" OR (base_ccy = ")
                    .push_bind(base.as_str())
                    .push(" AND quote_ccy = ")
                    .push_bind(quote.as_str())
                    .push(")");
            }
            qb.push(")");
        }
        qb.push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows: Vec<AnalysisRunRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(AnalysisRun::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_keeps_last() {
        let rows = vec![(1, "a"), (2, "b"), (1, "c")];
        let unique = dedupe_last(&rows, |r| r.0);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0].1, "c");
        assert_eq!(unique[1].1, "b");
    }

    #[test]
    fn test_embedded_schema_is_idempotent() {
        for stmt in SCHEMA_SQL.split(';').map(str::trim).filter(|s| s.starts_with("CREATE")) {
            assert!(stmt.contains("IF NOT EXISTS"), "{}", stmt);
        }
        assert!(SCHEMA_SQL.contains("ON DELETE CASCADE"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(db_err(sqlx::Error::PoolTimedOut).kind, StoreErrorKind::Connection);
        assert_eq!(db_err(sqlx::Error::RowNotFound).kind, StoreErrorKind::Query);
        assert_eq!(parse_timeframe("X9").unwrap_err().kind, StoreErrorKind::Decode);
    }
}
