use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::db::{
    connection::Database,
    helpers::{to_i64, to_u64},
    ingest::normalize_list,
    models::Pass,
    store::{PassStore, Snapshot, StoreError},
};

const PASSES_KEY: &str = "passes";

fn read_blob(conn: &Connection) -> Result<Option<(String, u64)>> {
    let row: Option<(String, i64)> = conn
        .query_row(
            "SELECT value, revision FROM kv_store WHERE key = ?1",
            params![PASSES_KEY],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .context("failed to read pass list")?;

    row.map(|(value, revision)| Ok((value, to_u64(revision, "revision")?)))
        .transpose()
}

fn current_revision(conn: &Connection) -> Result<u64> {
    Ok(read_blob(conn)?.map(|(_, revision)| revision).unwrap_or(0))
}

fn write_blob(conn: &Connection, serialized: &str, revision: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO kv_store (key, value, revision, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(key) DO UPDATE SET
             value = excluded.value,
             revision = excluded.revision,
             updated_at = excluded.updated_at",
        params![
            PASSES_KEY,
            serialized,
            to_i64(revision)?,
            Utc::now().to_rfc3339(),
        ],
    )
    .context("failed to write pass list")?;
    Ok(())
}

fn serialize(passes: &[Pass]) -> Result<String, StoreError> {
    serde_json::to_string(passes)
        .context("failed to serialize pass list")
        .map_err(StoreError::from)
}

#[async_trait]
impl PassStore for Database {
    async fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let blob = self.execute(|conn| read_blob(conn)).await?;

        let Some((raw, revision)) = blob else {
            return Ok(Snapshot::default());
        };

        let value: serde_json::Value = serde_json::from_str(&raw)
            .context("stored pass list is not valid JSON")
            .map_err(StoreError::from)?;

        Ok(Snapshot {
            passes: normalize_list(&value),
            revision,
        })
    }

    async fn save_all(&self, passes: Vec<Pass>) -> Result<(), StoreError> {
        let serialized = serialize(&passes)?;
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let next = current_revision(&tx)? + 1;
            write_blob(&tx, &serialized, next)?;
            tx.commit()?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn save_all_if(
        &self,
        expected_revision: u64,
        passes: Vec<Pass>,
    ) -> Result<(), StoreError> {
        let serialized = serialize(&passes)?;
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let found = current_revision(&tx)?;
            if found != expected_revision {
                return Ok(Err(StoreError::Conflict {
                    expected: expected_revision,
                    found,
                }));
            }
            write_blob(&tx, &serialized, found + 1)?;
            tx.commit()?;
            Ok(Ok(()))
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{PassPatch, PassStatus};
    use tempfile::TempDir;

    fn pass(id: &str) -> Pass {
        let mut pass = Pass::new(id, format!("CP-{}", id.to_uppercase()), "Visitor");
        pass.host = "Front Desk".into();
        pass
    }

    async fn insert_raw(db: &Database, raw: &'static str) {
        db.execute(move |conn| {
            conn.execute(
                "INSERT INTO kv_store (key, value, revision, updated_at) VALUES ('passes', ?1, 1, ?2)",
                params![raw, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn fresh_database_has_no_passes() {
        let db = Database::open_in_memory().unwrap();
        let snapshot = db.snapshot().await.unwrap();
        assert!(snapshot.passes.is_empty());
        assert_eq!(snapshot.revision, 0);
    }

    #[tokio::test]
    async fn add_update_delete_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.add(pass("a")).await.unwrap();
        db.add(pass("b")).await.unwrap();

        let updated = db
            .update(
                "a",
                PassPatch {
                    status: Some(PassStatus::CheckedOut),
                    ..PassPatch::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, PassStatus::CheckedOut);

        assert!(db.delete("b").await.unwrap());
        let all = db.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, PassStatus::CheckedOut);
        assert_eq!(db.snapshot().await.unwrap().revision, 4);
    }

    #[tokio::test]
    async fn stale_writer_gets_conflict() {
        let db = Database::open_in_memory().unwrap();
        db.add(pass("a")).await.unwrap();
        let stale = db.snapshot().await.unwrap();

        db.save_all(vec![pass("z")]).await.unwrap();

        let err = db
            .save_all_if(stale.revision, stale.passes)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 1, found: 2 }));
        assert_eq!(db.get_all().await.unwrap()[0].id, "z");
    }

    #[tokio::test]
    async fn legacy_blob_is_normalized_on_read() {
        let db = Database::open_in_memory().unwrap();
        insert_raw(&db, r#"[{"id":"old","code":"CP-OLD1","name":"Legacy"}]"#).await;

        let all = db.get_all().await.unwrap();
        assert_eq!(all[0].status, PassStatus::Created);
        assert_eq!(all[0].max_entries, 1);
        assert!(all[0].visits.is_empty());
    }

    #[tokio::test]
    async fn corrupt_blob_is_reported_as_unavailable() {
        let db = Database::open_in_memory().unwrap();
        insert_raw(&db, "{not json").await;

        let err = db.get_all().await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    #[tokio::test]
    async fn passes_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("carepass.sqlite3");

        {
            let db = Database::new(path.clone()).unwrap();
            db.add(pass("keep")).await.unwrap();
        }

        let db = Database::new(path).unwrap();
        let all = db.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "keep");
        assert_eq!(all[0].host, "Front Desk");
    }
}
