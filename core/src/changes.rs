use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Database-side queries the change detector is built on.
#[async_trait]
pub trait TableCatalog: Send + Sync {
    /// All user tables, schema-qualified.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Tables whose last vacuum or analyze (manual or automatic) is newer than `since`.
    async fn maintained_since(&self, since: DateTime<Utc>) -> Result<Vec<String>>;

    /// Tables declaring at least one of `columns`, paired with the first
    /// matching column name.
    async fn tables_with_column(&self, columns: &[String]) -> Result<Vec<(String, String)>>;

    /// Whether `table` has a row with `column` newer than `since`.
    async fn has_rows_since(&self, table: &str, column: &str, since: DateTime<Utc>) -> Result<bool>;
}

pub struct ChangeDetector {
    catalog: Arc<dyn TableCatalog>,
    exclude_tables: Vec<String>,
    timestamp_columns: Vec<String>,
}

impl ChangeDetector {
    pub fn new(catalog: Arc<dyn TableCatalog>, exclude_tables: Vec<String>, timestamp_columns: Vec<String>) -> Self {
        Self {
            catalog,
            exclude_tables,
            timestamp_columns,
        }
    }

    pub async fn all_tables(&self) -> Result<Vec<String>> {
        let mut tables = self.catalog.list_tables().await?;
        tables.sort();
        tables.dedup();
        Ok(tables)
    }

    /// Sorted, deduplicated union of tables touched by maintenance since
    /// `since` and tables with rows updated since `since`.
    pub async fn modified_tables(&self, since: DateTime<Utc>) -> Result<Vec<String>> {
        let mut modified: BTreeSet<String> = self.catalog.maintained_since(since).await?.into_iter().collect();
        debug!("{} tables maintained since {}", modified.len(), since);

        let candidates = self.catalog.tables_with_column(&self.timestamp_columns).await?;
        for (table, column) in candidates {
            if self.is_excluded(&table) || modified.contains(&table) {
                continue;
            }

            match self.catalog.has_rows_since(&table, &column, since).await {
                Ok(true) => {
                    debug!("Table {} has rows with {} after {}", table, column, since);
                    modified.insert(table);
                }
                Ok(false) => {}
                Err(e) => warn!("Skipping change check for table {}: {}", table, e),
            }
        }

        Ok(modified.into_iter().collect())
    }

    /// Exclusions match either the qualified name or the bare table name.
    fn is_excluded(&self, table: &str) -> bool {
        let bare = table.rsplit_once('.').map_or(table, |(_, name)| name);
        self.exclude_tables.iter().any(|e| e == table || e == bare)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeCatalog {
        tables: Vec<String>,
        maintained: Vec<String>,
        with_column: Vec<(String, String)>,
        rows: HashMap<String, bool>,
        failing: Vec<String>,
        checked: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TableCatalog for FakeCatalog {
        async fn list_tables(&self) -> Result<Vec<String>> {
            Ok(self.tables.clone())
        }

        async fn maintained_since(&self, _since: DateTime<Utc>) -> Result<Vec<String>> {
            Ok(self.maintained.clone())
        }

        async fn tables_with_column(&self, _columns: &[String]) -> Result<Vec<(String, String)>> {
            Ok(self.with_column.clone())
        }

        async fn has_rows_since(&self, table: &str, _column: &str, _since: DateTime<Utc>) -> Result<bool> {
            self.checked.lock().unwrap().push(table.to_string());
            if self.failing.iter().any(|t| t == table) {
                return Err(Error::Database("permission denied".to_string()));
            }
            Ok(self.rows.get(table).copied().unwrap_or(false))
        }
    }

    fn since() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 11, 0, 0, 0).unwrap()
    }

    fn col(table: &str) -> (String, String) {
        (table.to_string(), "updated_at".to_string())
    }

    #[tokio::test]
    async fn test_union_of_signals_is_sorted_and_deduplicated() {
        let catalog = Arc::new(FakeCatalog {
            maintained: vec!["public.orders".to_string(), "public.audit".to_string()],
            with_column: vec![col("public.users"), col("public.orders"), col("public.items")],
            rows: HashMap::from([("public.users".to_string(), true), ("public.items".to_string(), false)]),
            ..Default::default()
        });
        let detector = ChangeDetector::new(catalog.clone(), vec![], vec!["updated_at".to_string()]);

        let tables = detector.modified_tables(since()).await.unwrap();
        assert_eq!(tables, vec!["public.audit", "public.orders", "public.users"]);
        // Tables already known to be modified aren't checked again.
        assert!(!catalog.checked.lock().unwrap().contains(&"public.orders".to_string()));
    }

    #[tokio::test]
    async fn test_excluded_tables_are_not_checked() {
        let catalog = Arc::new(FakeCatalog {
            with_column: vec![col("public.sessions"), col("public.users")],
            rows: HashMap::from([("public.sessions".to_string(), true), ("public.users".to_string(), true)]),
            ..Default::default()
        });
        let detector = ChangeDetector::new(catalog.clone(), vec!["sessions".to_string()], vec![]);

        let tables = detector.modified_tables(since()).await.unwrap();
        assert_eq!(tables, vec!["public.users"]);
        assert_eq!(*catalog.checked.lock().unwrap(), vec!["public.users".to_string()]);
    }

    #[tokio::test]
    async fn test_row_check_failure_skips_table() {
        let catalog = Arc::new(FakeCatalog {
            with_column: vec![col("public.secret"), col("public.users")],
            rows: HashMap::from([("public.users".to_string(), true)]),
            failing: vec!["public.secret".to_string()],
            ..Default::default()
        });
        let detector = ChangeDetector::new(catalog, vec![], vec![]);

        let tables = detector.modified_tables(since()).await.unwrap();
        assert_eq!(tables, vec!["public.users"]);
    }

    #[tokio::test]
    async fn test_no_changes() {
        let detector = ChangeDetector::new(Arc::new(FakeCatalog::default()), vec![], vec![]);
        assert!(detector.modified_tables(since()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_tables_sorted() {
        let catalog = Arc::new(FakeCatalog {
            tables: vec!["public.b".to_string(), "public.a".to_string(), "public.b".to_string()],
            ..Default::default()
        });
        let detector = ChangeDetector::new(catalog, vec![], vec![]);
        assert_eq!(detector.all_tables().await.unwrap(), vec!["public.a", "public.b"]);
    }
}
