pub mod lakefs;

pub use lakefs::LakeFsTableStore;

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use tagwatch_common::file_config::{StorageConfig, TableConfig};
use tagwatch_common::{Partition, Partitioned};

use crate::traits::TableStore;

/// Columns read back from the raw posts table.
pub const RAW_COLUMNS: &[&str] = &[
    "author",
    "text",
    "category",
    "tag",
    "postTimeRaw",
    "year",
    "month",
    "day",
];

/// Columns read back from the classified table.
pub const CLASSIFIED_COLUMNS: &[&str] = &[
    "class",
    "topic",
    "subtopic",
    "text",
    "tag",
    "author",
    "postTimeRaw",
    "year",
    "month",
    "day",
];

/// A partitioned table on one branch of a versioned repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub repository: String,
    pub branch: String,
    /// Path prefix for the table's objects.
    pub prefix: String,
    /// Storage namespace used when the repository has to be created.
    pub namespace: String,
}

impl TableRef {
    pub fn from_config(storage: &StorageConfig, table: &TableConfig) -> Self {
        Self {
            repository: table.repository.clone(),
            branch: storage.branch.clone(),
            prefix: table.prefix.trim_matches('/').to_string(),
            namespace: format!("{}{}", storage.namespace_root, table.repository),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.repository, self.branch, self.prefix)
    }
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("could not prepare table {table}")]
    Ensure {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("could not serialize row for {table}")]
    Serialize {
        table: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("writing partition {partition} of {table} failed")]
    Write {
        table: String,
        partition: Partition,
        #[source]
        source: anyhow::Error,
    },

    #[error("commit to {table} failed")]
    Commit {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("reading back {table} failed")]
    ReadBack {
        table: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("read back {found} row(s) from {table}, expected at least {expected}")]
    ReadBackMismatch {
        table: String,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistReport {
    pub written: usize,
    /// Rows without a partition key.
    pub skipped: usize,
    pub partitions: Vec<Partition>,
    pub read_back: usize,
}

/// Write `rows` grouped by calendar partition, commit, and verify by reading
/// this run's rows back with `columns`.
pub async fn persist_partitioned<R>(
    store: &dyn TableStore,
    table: &TableRef,
    rows: &[R],
    columns: &[&str],
) -> Result<PersistReport, PersistError>
where
    R: Serialize + Partitioned,
{
    let label = table.to_string();

    store
        .ensure_table(table)
        .await
        .map_err(|source| PersistError::Ensure {
            table: label.clone(),
            source,
        })?;

    let mut grouped: BTreeMap<Partition, Vec<Value>> = BTreeMap::new();
    let mut skipped = 0;
    for row in rows {
        let Some(partition) = row.partition() else {
            skipped += 1;
            continue;
        };
        let value = serde_json::to_value(row).map_err(|source| PersistError::Serialize {
            table: label.clone(),
            source,
        })?;
        grouped.entry(partition).or_default().push(value);
    }
    if skipped > 0 {
        warn!(table = %label, skipped, "Rows without a post time left out of partitioned write");
    }

    let written = rows.len() - skipped;
    let partitions: Vec<Partition> = grouped.keys().copied().collect();

    if written == 0 {
        info!(table = %label, "Nothing to persist");
        return Ok(PersistReport {
            written,
            skipped,
            partitions,
            read_back: 0,
        });
    }

    for (partition, values) in grouped {
        store
            .write_partition(table, partition, values)
            .await
            .map_err(|source| PersistError::Write {
                table: label.clone(),
                partition,
                source,
            })?;
    }

    let message = format!("Load {written} rows into {} partition(s)", partitions.len());
    store
        .commit(table, &message)
        .await
        .map_err(|source| PersistError::Commit {
            table: label.clone(),
            source,
        })?;

    let read_back = store
        .read_back(table, columns)
        .await
        .map_err(|source| PersistError::ReadBack {
            table: label.clone(),
            source,
        })?
        .len();

    if read_back < written {
        return Err(PersistError::ReadBackMismatch {
            table: label,
            expected: written,
            found: read_back,
        });
    }

    info!(table = %label, written, partitions = partitions.len(), read_back, "Persisted table");
    Ok(PersistReport {
        written,
        skipped,
        partitions,
        read_back,
    })
}
