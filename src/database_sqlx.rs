use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    QueryBuilder, Row, Sqlite, SqlitePool,
};
use tracing::{debug, info};

use crate::error::{Result, SyncError};
use crate::models::{CorporateCodeMapping, CredentialCategory, FinancialStatementYear, StockRecord};

// SQLite caps bound parameters per statement; keep each batch well below it
const INSERT_BATCH_ROWS: usize = 500;

/// Looks up API keys by category
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn get_key(&self, category: CredentialCategory) -> Result<String>;
}

/// SQLX-backed reference store: stocks, DART code mappings, financial years, credentials
#[derive(Clone)]
pub struct ReferenceStore {
    pool: SqlitePool,
}

impl ReferenceStore {
    /// Open (or create) the SQLite database and make sure the schema exists
    pub async fn new(database_path: &str) -> Result<Self> {
        let filename = database_path.strip_prefix("sqlite:").unwrap_or(database_path);
        debug!("Connecting to database: {}", filename);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(SqliteConnectOptions::new().filename(filename).create_if_missing(true))
            .await?;

        // WAL lets readers keep their snapshot while a refresh transaction writes
        sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;
        sqlx::query("PRAGMA synchronous = NORMAL").execute(&pool).await?;

        let store = Self { pool };
        store.create_schema().await?;
        info!("💾 Reference store ready at {}", filename);
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stocks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stock_code TEXT UNIQUE NOT NULL,
                company_name TEXT NOT NULL,
                isin_code TEXT NOT NULL,
                market TEXT NOT NULL,
                listing_date TEXT NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dart_codes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stock_code TEXT UNIQUE NOT NULL,
                company_name TEXT NOT NULL,
                dart_code TEXT NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS financial_data (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                stock_code TEXT NOT NULL,
                fiscal_year INTEGER NOT NULL,
                revenue INTEGER,
                operating_income INTEGER,
                net_income INTEGER,
                total_assets INTEGER,
                total_liabilities INTEGER,
                total_equity INTEGER,
                cash_flow_operations INTEGER,
                cash_flow_investing INTEGER,
                cash_flow_financing INTEGER,
                raw_data TEXT NOT NULL,
                updated_at DATETIME NOT NULL,
                UNIQUE(stock_code, fiscal_year)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
                category TEXT PRIMARY KEY,
                api_key TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_stocks_company_name ON stocks(company_name)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // stocks
    // ------------------------------------------------------------------

    /// Replace the whole stock table in one transaction
    pub async fn replace_stocks(&self, stocks: &[StockRecord]) -> Result<usize> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let cleared = sqlx::query("DELETE FROM stocks").execute(&mut *tx).await?;
        debug!("Cleared {} existing stock rows", cleared.rows_affected());

        for chunk in stocks.chunks(INSERT_BATCH_ROWS) {
            let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO stocks (stock_code, company_name, isin_code, market, listing_date, updated_at) ",
            );
            builder.push_values(chunk, |mut row, stock| {
                row.push_bind(&stock.stock_code)
                    .push_bind(&stock.company_name)
                    .push_bind(&stock.isin_code)
                    .push_bind(&stock.market)
                    .push_bind(&stock.listing_date)
                    .push_bind(now);
            });
            builder.push(
                " ON CONFLICT(stock_code) DO UPDATE SET
                    company_name = excluded.company_name,
                    isin_code = excluded.isin_code,
                    market = excluded.market,
                    listing_date = excluded.listing_date,
                    updated_at = excluded.updated_at",
            );
            builder.build().execute(&mut *tx).await?;
        }

        // Count inside the transaction: concurrent writers must not leak into the result
        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stocks")
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(stored as usize)
    }

    pub async fn get_stock(&self, stock_code: &str) -> Result<Option<StockRecord>> {
        let row = sqlx::query(
            "SELECT stock_code, company_name, isin_code, market, listing_date FROM stocks WHERE stock_code = ?",
        )
        .bind(stock_code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| StockRecord {
            stock_code: r.get("stock_code"),
            company_name: r.get("company_name"),
            isin_code: r.get("isin_code"),
            market: r.get("market"),
            listing_date: r.get("listing_date"),
        }))
    }

    pub async fn count_stocks(&self) -> Result<usize> {
        self.count_rows("stocks").await
    }

    // ------------------------------------------------------------------
    // dart_codes
    // ------------------------------------------------------------------

    /// Replace the whole DART code table in one transaction
    pub async fn replace_corp_codes(&self, mappings: &[CorporateCodeMapping]) -> Result<usize> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let cleared = sqlx::query("DELETE FROM dart_codes").execute(&mut *tx).await?;
        debug!("Cleared {} existing DART code rows", cleared.rows_affected());

        for chunk in mappings.chunks(INSERT_BATCH_ROWS) {
            let mut builder: QueryBuilder<Sqlite> =
                QueryBuilder::new("INSERT INTO dart_codes (stock_code, company_name, dart_code, updated_at) ");
            builder.push_values(chunk, |mut row, mapping| {
                row.push_bind(&mapping.stock_code)
                    .push_bind(&mapping.company_name)
                    .push_bind(&mapping.dart_code)
                    .push_bind(now);
            });
            builder.push(
                " ON CONFLICT(stock_code) DO UPDATE SET
                    company_name = excluded.company_name,
                    dart_code = excluded.dart_code,
                    updated_at = excluded.updated_at",
            );
            builder.build().execute(&mut *tx).await?;
        }

        // Count inside the transaction: concurrent writers must not leak into the result
        let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dart_codes")
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(stored as usize)
    }

    /// Exact-match lookup on the padded stock code
    pub async fn find_corp_code(&self, stock_code: &str) -> Result<Option<CorporateCodeMapping>> {
        let row = sqlx::query("SELECT stock_code, company_name, dart_code FROM dart_codes WHERE stock_code = ?")
            .bind(stock_code)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| CorporateCodeMapping {
            stock_code: r.get("stock_code"),
            company_name: r.get("company_name"),
            dart_code: r.get("dart_code"),
        }))
    }

    pub async fn count_corp_codes(&self) -> Result<usize> {
        self.count_rows("dart_codes").await
    }

    // ------------------------------------------------------------------
    // financial_data
    // ------------------------------------------------------------------

    /// Upsert by (stock_code, fiscal_year); years not passed in are left alone
    pub async fn upsert_financial_years(&self, years: &[FinancialStatementYear]) -> Result<()> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for year in years {
            let raw = serde_json::to_string(&year.raw_data)
                .map_err(|e| SyncError::MalformedResponse(format!("raw payload for {}: {}", year.fiscal_year, e)))?;

            sqlx::query(
                r#"
                INSERT INTO financial_data (
                    stock_code, fiscal_year, revenue, operating_income, net_income,
                    total_assets, total_liabilities, total_equity,
                    cash_flow_operations, cash_flow_investing, cash_flow_financing,
                    raw_data, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(stock_code, fiscal_year) DO UPDATE SET
                    revenue = excluded.revenue,
                    operating_income = excluded.operating_income,
                    net_income = excluded.net_income,
                    total_assets = excluded.total_assets,
                    total_liabilities = excluded.total_liabilities,
                    total_equity = excluded.total_equity,
                    cash_flow_operations = excluded.cash_flow_operations,
                    cash_flow_investing = excluded.cash_flow_investing,
                    cash_flow_financing = excluded.cash_flow_financing,
                    raw_data = excluded.raw_data,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&year.stock_code)
            .bind(year.fiscal_year)
            .bind(year.revenue)
            .bind(year.operating_income)
            .bind(year.net_income)
            .bind(year.total_assets)
            .bind(year.total_liabilities)
            .bind(year.total_equity)
            .bind(year.cash_flow_operations)
            .bind(year.cash_flow_investing)
            .bind(year.cash_flow_financing)
            .bind(raw)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// All stored years for a stock, newest first
    pub async fn get_financial_years(&self, stock_code: &str) -> Result<Vec<FinancialStatementYear>> {
        let rows = sqlx::query(
            r#"
            SELECT stock_code, fiscal_year, revenue, operating_income, net_income,
                   total_assets, total_liabilities, total_equity,
                   cash_flow_operations, cash_flow_investing, cash_flow_financing, raw_data
            FROM financial_data
            WHERE stock_code = ?
            ORDER BY fiscal_year DESC
            "#,
        )
        .bind(stock_code)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| {
                let raw: String = r.get("raw_data");
                let raw_data = serde_json::from_str(&raw)
                    .map_err(|e| SyncError::MalformedResponse(format!("stored raw_data: {}", e)))?;
                Ok(FinancialStatementYear {
                    stock_code: r.get("stock_code"),
                    fiscal_year: r.get("fiscal_year"),
                    revenue: r.get("revenue"),
                    operating_income: r.get("operating_income"),
                    net_income: r.get("net_income"),
                    total_assets: r.get("total_assets"),
                    total_liabilities: r.get("total_liabilities"),
                    total_equity: r.get("total_equity"),
                    cash_flow_operations: r.get("cash_flow_operations"),
                    cash_flow_investing: r.get("cash_flow_investing"),
                    cash_flow_financing: r.get("cash_flow_financing"),
                    raw_data,
                })
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // credentials
    // ------------------------------------------------------------------

    pub async fn set_credential(&self, category: CredentialCategory, api_key: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO credentials (category, api_key) VALUES (?, ?)
             ON CONFLICT(category) DO UPDATE SET api_key = excluded.api_key",
        )
        .bind(category.label())
        .bind(api_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[async_trait]
impl CredentialResolver for ReferenceStore {
    async fn get_key(&self, category: CredentialCategory) -> Result<String> {
        let key: Option<String> = sqlx::query_scalar("SELECT api_key FROM credentials WHERE category = ? LIMIT 1")
            .bind(category.label())
            .fetch_optional(&self.pool)
            .await?;

        key.filter(|k| !k.trim().is_empty())
            .ok_or(SyncError::CredentialNotFound(category))
    }
}
