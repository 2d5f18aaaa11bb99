use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dumpvault_core::config::DatabaseConfig;
use dumpvault_core::{Error, Result, TableCatalog};
use sqlx::FromRow;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::time::Duration;

const USER_TABLES: &str = "SELECT schemaname::text || '.' || tablename::text \
     FROM pg_catalog.pg_tables \
     WHERE schemaname NOT IN ('pg_catalog', 'information_schema') \
     ORDER BY 1";

const MAINTAINED_SINCE: &str = "SELECT schemaname::text || '.' || relname::text \
     FROM pg_catalog.pg_stat_user_tables \
     WHERE GREATEST(last_vacuum, last_autovacuum, last_analyze, last_autoanalyze) > $1 \
     ORDER BY 1";

const TABLES_WITH_COLUMN: &str = "SELECT DISTINCT ON (c.table_schema, c.table_name) \
         c.table_schema::text AS table_schema, \
         c.table_name::text AS table_name, \
         c.column_name::text AS column_name \
     FROM information_schema.columns c \
     JOIN information_schema.tables t \
         ON t.table_schema = c.table_schema AND t.table_name = c.table_name \
     WHERE t.table_type = 'BASE TABLE' \
         AND c.table_schema NOT IN ('pg_catalog', 'information_schema') \
         AND c.column_name::text = ANY($1) \
     ORDER BY c.table_schema, c.table_name, array_position($1, c.column_name::text)";

#[derive(Debug, FromRow)]
struct ColumnRow {
    table_schema: String,
    table_name: String,
    column_name: String,
}

/// Catalog queries against a live PostgreSQL server.
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    /// Connects lazily; nothing touches the network until the first query.
    pub fn connect_lazy(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect_lazy_with(connect_options(config)?);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// The configured URL when there is one, otherwise the individual fields.
/// Credentials are never spliced into a URL, so they need no escaping.
fn connect_options(config: &DatabaseConfig) -> Result<PgConnectOptions> {
    if let Some(url) = &config.url {
        return url.parse().map_err(db_error);
    }
    let options = PgConnectOptions::new()
        .host(&config.host)
        .port(config.port)
        .username(&config.user)
        .database(&config.database);
    Ok(match &config.password {
        Some(password) => options.password(password),
        None => options,
    })
}

fn db_error(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}

/// Quote a possibly schema-qualified identifier for interpolation into SQL.
/// The same quoting makes a `pg_dump -t` pattern match exactly one table.
pub(crate) fn quote_qualified(table: &str) -> String {
    match table.split_once('.') {
        Some((schema, name)) => format!("{}.{}", quote_ident(schema), quote_ident(name)),
        None => quote_ident(table),
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn rows_since_query(table: &str, column: &str) -> String {
    format!(
        "SELECT EXISTS (SELECT 1 FROM {} WHERE {} > $1)",
        quote_qualified(table),
        quote_ident(column)
    )
}

#[async_trait]
impl TableCatalog for PgCatalog {
    async fn list_tables(&self) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(USER_TABLES)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn maintained_since(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(MAINTAINED_SINCE)
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn tables_with_column(&self, columns: &[String]) -> Result<Vec<(String, String)>> {
        if columns.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query_as::<_, ColumnRow>(TABLES_WITH_COLUMN)
            .bind(columns)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(rows
            .into_iter()
            .map(|row| (format!("{}.{}", row.table_schema, row.table_name), row.column_name))
            .collect())
    }

    async fn has_rows_since(&self, table: &str, column: &str, since: DateTime<Utc>) -> Result<bool> {
        let sql = rows_since_query(table, column);
        sqlx::query_scalar::<_, bool>(&sql)
            .bind(since)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)
    }
}
