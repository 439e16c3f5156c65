//! [`TableStore`] backed by a lakeFS branch.
//!
//! Each partition is one JSON Lines object per run under a hive-style path,
//! `<prefix>/year=<y>/month=<m>/day=<d>/part-<run_id>.jsonl`. Partition keys
//! live in the path, not in the rows. Read-back only opens this run's objects.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use lakefs_client::{LakeFsClient, LakeFsError, RepositoryCreation};
use tagwatch_common::{AppConfig, Partition, TagwatchError};

use super::TableRef;
use crate::traits::TableStore;

const PARTITION_KEYS: [&str; 3] = ["year", "month", "day"];

pub struct LakeFsTableStore {
    client: LakeFsClient,
    run_id: Uuid,
}

impl LakeFsTableStore {
    pub fn new(client: LakeFsClient, run_id: Uuid) -> Self {
        Self { client, run_id }
    }

    pub fn from_config(config: &AppConfig, run_id: Uuid) -> Result<Self, TagwatchError> {
        let (access_key, secret_key) = config.lakefs_credentials()?;
        let client = LakeFsClient::new(
            &config.lakefs_endpoint,
            access_key.to_string(),
            secret_key.to_string(),
        );
        Ok(Self::new(client, run_id))
    }

    fn object_path(&self, table: &TableRef, partition: Partition) -> String {
        format!("{}/{}/part-{}.jsonl", table.prefix, partition.path(), self.run_id)
    }

    fn written_by_run(&self, path: &str) -> bool {
        path.ends_with(&format!("/part-{}.jsonl", self.run_id))
    }
}

#[async_trait]
impl TableStore for LakeFsTableStore {
    async fn ensure_table(&self, table: &TableRef) -> Result<()> {
        self.client
            .ensure_repository(&RepositoryCreation {
                name: table.repository.clone(),
                storage_namespace: table.namespace.clone(),
                default_branch: table.branch.clone(),
            })
            .await
            .with_context(|| format!("Failed to ensure repository {}", table.repository))
    }

    async fn write_partition(
        &self,
        table: &TableRef,
        partition: Partition,
        rows: Vec<Value>,
    ) -> Result<()> {
        let path = self.object_path(table, partition);
        let body = encode_jsonl(rows)?;

        let stats = self
            .client
            .upload_object(&table.repository, &table.branch, &path, body)
            .await
            .with_context(|| format!("Failed to upload {path}"))?;
        debug!(path = %stats.path, size = ?stats.size_bytes, "Uploaded partition");
        Ok(())
    }

    async fn commit(&self, table: &TableRef, message: &str) -> Result<()> {
        let metadata = BTreeMap::from([("run_id".to_string(), self.run_id.to_string())]);
        match self
            .client
            .commit(&table.repository, &table.branch, message, metadata)
            .await
        {
            Ok(_) => Ok(()),
            Err(LakeFsError::NoChanges { .. }) => {
                info!(table = %table, "Nothing staged, commit skipped");
                Ok(())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to commit to {table}")),
        }
    }

    async fn read_back(&self, table: &TableRef, columns: &[&str]) -> Result<Vec<Map<String, Value>>> {
        let prefix = format!("{}/", table.prefix);
        let objects = self
            .client
            .list_objects(&table.repository, &table.branch, &prefix)
            .await
            .with_context(|| format!("Failed to list {table}"))?;

        let mut rows = Vec::new();
        let mut read = 0;
        for object in objects.iter().filter(|o| self.written_by_run(&o.path)) {
            read += 1;
            let partition = Partition::parse_path(&object.path);
            let bytes = self
                .client
                .get_object(&table.repository, &table.branch, &object.path)
                .await
                .with_context(|| format!("Failed to read {}", object.path))?;
            let content = std::str::from_utf8(&bytes)
                .with_context(|| format!("{} is not UTF-8", object.path))?;

            for row in decode_jsonl(content).with_context(|| format!("Bad row in {}", object.path))? {
                rows.push(project(row, partition, columns));
            }
        }

        debug!(table = %table, listed = objects.len(), read, rows = rows.len(), "Read run back");
        Ok(rows)
    }
}

/// One JSON object per line, partition keys removed.
fn encode_jsonl(rows: Vec<Value>) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    for mut row in rows {
        if let Value::Object(map) = &mut row {
            for key in PARTITION_KEYS {
                map.remove(key);
            }
        }
        serde_json::to_writer(&mut body, &row)?;
        body.push(b'\n');
    }
    Ok(body)
}

fn decode_jsonl(content: &str) -> Result<Vec<Map<String, Value>>> {
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| Ok(serde_json::from_str(line)?))
        .collect()
}

/// Keep `columns`, restoring partition keys from the object path.
fn project(
    mut row: Map<String, Value>,
    partition: Option<Partition>,
    columns: &[&str],
) -> Map<String, Value> {
    if let Some(p) = partition {
        row.insert("year".into(), p.year.into());
        row.insert("month".into(), p.month.into());
        row.insert("day".into(), p.day.into());
    }
    row.retain(|key, _| columns.contains(&key.as_str()));
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_path_is_hive_style() {
        let store = LakeFsTableStore::new(
            LakeFsClient::new("http://lakefs:8000", "a".into(), "s".into()),
            Uuid::nil(),
        );
        let table = TableRef {
            repository: "tweets-repo".into(),
            branch: "main".into(),
            prefix: "tweets".into(),
            namespace: "local://tweets-repo".into(),
        };
        let partition = Partition {
            year: 2024,
            month: 1,
            day: 4,
        };

        assert_eq!(
            store.object_path(&table, partition),
            "tweets/year=2024/month=1/day=4/part-00000000-0000-0000-0000-000000000000.jsonl"
        );
    }

    #[test]
    fn read_back_ignores_other_runs() {
        let run_id = Uuid::new_v4();
        let store = LakeFsTableStore::new(
            LakeFsClient::new("http://lakefs:8000", "a".into(), "s".into()),
            run_id,
        );

        assert!(store.written_by_run(&format!("tweets/year=2024/month=1/day=4/part-{run_id}.jsonl")));
        assert!(!store.written_by_run(&format!(
            "tweets/year=2024/month=1/day=4/part-{}.jsonl",
            Uuid::new_v4()
        )));
        assert!(!store.written_by_run(&format!("tweets/year=2024/month=1/day=4/part-{run_id}.json")));
    }

    #[test]
    fn partition_keys_move_from_rows_to_path_and_back() {
        let body = encode_jsonl(vec![
            json!({"author": "a", "text": "x", "year": 2024, "month": 1, "day": 4, "capturedAt": "t"}),
            json!({"author": "b", "text": "y", "year": 2024, "month": 1, "day": 4}),
        ])
        .unwrap();
        let content = String::from_utf8(body).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(!content.contains("year"));

        let partition = Partition::parse_path("tweets/year=2024/month=1/day=4/part-x.jsonl");
        let rows: Vec<_> = decode_jsonl(&content)
            .unwrap()
            .into_iter()
            .map(|row| project(row, partition, &["author", "year", "day"]))
            .collect();

        assert_eq!(
            Value::Object(rows[0].clone()),
            json!({"author": "a", "year": 2024, "day": 4})
        );
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn garbage_line_is_an_error() {
        assert!(decode_jsonl("{\"a\": 1}\nnot json\n").is_err());
    }
}
