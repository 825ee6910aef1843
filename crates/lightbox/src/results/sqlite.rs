//! SQLite implementation of the result store.

use super::{ResultStore, ResultStoreError, ResultStoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lightbox_protocol::{
    AnalysisRecord, Category, NewAnalysisRecord, PublicReference, RecordId,
    StoredPublicReference, Visibility,
};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;

pub struct SqliteResultStore {
    pool: SqlitePool,
}

impl SqliteResultStore {
    /// Open (creating if needed) the database at `db_path`.
    pub async fn open(db_path: &Path) -> ResultStoreResult<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let store = Self { pool };
        store.initialize_tables().await?;
        Ok(store)
    }

    /// Private in-memory database; a single connection so every query sees it.
    pub async fn in_memory() -> ResultStoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.initialize_tables().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn initialize_tables(&self) -> ResultStoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_records (
                record_id TEXT PRIMARY KEY,
                namespace TEXT NOT NULL,
                image_url TEXT NOT NULL,
                file_path TEXT NOT NULL,
                tags TEXT NOT NULL,
                category TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                visibility TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_analysis_records_namespace
            ON analysis_records(namespace, created_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS public_references (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                record_id TEXT NOT NULL,
                owner_id TEXT NOT NULL,
                namespace TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl ResultStore for SqliteResultStore {
    async fn append_record(
        &self,
        namespace: &str,
        record: &NewAnalysisRecord,
    ) -> ResultStoreResult<RecordId> {
        let record_id = RecordId::new();
        let tags = serde_json::to_string(&record.tags)?;

        sqlx::query(
            r#"
            INSERT INTO analysis_records
                (record_id, namespace, image_url, file_path, tags, category, owner_id, visibility, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(record_id.as_str())
        .bind(namespace)
        .bind(&record.image_url)
        .bind(&record.file_path)
        .bind(&tags)
        .bind(record.category.as_str())
        .bind(&record.owner_id)
        .bind(record.visibility.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(record_id)
    }

    async fn append_public_reference(
        &self,
        record_id: &RecordId,
        reference: &PublicReference,
    ) -> ResultStoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO public_references (record_id, owner_id, namespace, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(record_id.as_str())
        .bind(&reference.owner_id)
        .bind(&reference.namespace)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_records(&self, namespace: &str) -> ResultStoreResult<Vec<AnalysisRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT record_id, namespace, image_url, file_path, tags, category, owner_id, visibility, created_at
            FROM analysis_records
            WHERE namespace = ?1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(namespace)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn list_public_references(&self) -> ResultStoreResult<Vec<StoredPublicReference>> {
        let rows = sqlx::query(
            r#"
            SELECT record_id, owner_id, namespace, created_at
            FROM public_references
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> ResultStoreResult<StoredPublicReference> {
                Ok(StoredPublicReference {
                    record_id: parse_record_id(row.get("record_id"))?,
                    owner_id: row.get("owner_id"),
                    namespace: row.get("namespace"),
                    created_at: parse_timestamp(row.get("created_at"))?,
                })
            })
            .collect()
    }
}

fn record_from_row(row: &SqliteRow) -> ResultStoreResult<AnalysisRecord> {
    let tags: String = row.get("tags");
    let category: String = row.get("category");
    let visibility: String = row.get("visibility");

    Ok(AnalysisRecord {
        record_id: parse_record_id(row.get("record_id"))?,
        namespace: row.get("namespace"),
        image_url: row.get("image_url"),
        file_path: row.get("file_path"),
        tags: serde_json::from_str(&tags)?,
        category: category
            .parse::<Category>()
            .map_err(|_| ResultStoreError::Corrupt {
                field: "category",
                value: category.clone(),
            })?,
        owner_id: row.get("owner_id"),
        visibility: visibility
            .parse::<Visibility>()
            .map_err(|_| ResultStoreError::Corrupt {
                field: "visibility",
                value: visibility.clone(),
            })?,
        created_at: parse_timestamp(row.get("created_at"))?,
    })
}

fn parse_record_id(value: String) -> ResultStoreResult<RecordId> {
    RecordId::parse(&value).map_err(|_| ResultStoreError::Corrupt {
        field: "record_id",
        value,
    })
}

fn parse_timestamp(value: String) -> ResultStoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| ResultStoreError::Corrupt {
            field: "created_at",
            value,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightbox_protocol::{owner_namespace, PUBLIC_NAMESPACE};
    use tempfile::tempdir;

    fn sample(owner: &str, visibility: Visibility) -> NewAnalysisRecord {
        NewAnalysisRecord {
            image_url: format!("file:///store/processed/{}.jpg", owner),
            file_path: format!("processed/{}.jpg", owner),
            tags: vec!["Dog".to_string(), "Grass".to_string(), "Ball".to_string()],
            category: Category::Pets,
            owner_id: owner.to_string(),
            visibility,
        }
    }

    #[tokio::test]
    async fn test_append_and_list_records() {
        let tmp_dir = tempdir().unwrap();
        let store = SqliteResultStore::open(&tmp_dir.path().join("results.db"))
            .await
            .unwrap();

        let ns = owner_namespace("u1");
        let id = store
            .append_record(&ns, &sample("u1", Visibility::Private))
            .await
            .unwrap();
        store
            .append_record(&owner_namespace("u2"), &sample("u2", Visibility::Private))
            .await
            .unwrap();

        let records = store.list_records(&ns).await.unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.record_id, id);
        assert_eq!(record.tags, vec!["Dog", "Grass", "Ball"]);
        assert_eq!(record.category, Category::Pets);
        assert_eq!(record.visibility, Visibility::Private);
        assert_eq!(record.namespace, "users/u1/images");
    }

    #[tokio::test]
    async fn test_public_reference_points_at_record() {
        let store = SqliteResultStore::in_memory().await.unwrap();
        let ns = owner_namespace("u1");
        let id = store
            .append_record(&ns, &sample("u1", Visibility::Public))
            .await
            .unwrap();
        store
            .append_public_reference(
                &id,
                &PublicReference {
                    owner_id: "u1".to_string(),
                    namespace: ns.clone(),
                },
            )
            .await
            .unwrap();

        let refs = store.list_public_references().await.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].record_id, id);
        assert_eq!(refs[0].namespace, ns);
        assert_ne!(refs[0].namespace, PUBLIC_NAMESPACE);
    }

    #[tokio::test]
    async fn test_store_accepts_duplicate_appends() {
        let store = SqliteResultStore::in_memory().await.unwrap();
        let ns = owner_namespace("u1");
        let record = sample("u1", Visibility::Private);
        let a = store.append_record(&ns, &record).await.unwrap();
        let b = store.append_record(&ns, &record).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.list_records(&ns).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_category_is_reported() {
        let store = SqliteResultStore::in_memory().await.unwrap();
        let ns = owner_namespace("u1");
        store
            .append_record(&ns, &sample("u1", Visibility::Private))
            .await
            .unwrap();
        sqlx::query("UPDATE analysis_records SET category = 'Vehicles'")
            .execute(store.pool())
            .await
            .unwrap();

        let err = store.list_records(&ns).await.unwrap_err();
        assert!(matches!(
            err,
            ResultStoreError::Corrupt {
                field: "category",
                ..
            }
        ));
    }
}
