use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// --- Repositories ---

/// Body for `POST /repositories`.
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryCreation {
    pub name: String,
    pub storage_namespace: String,
    pub default_branch: String,
}

// --- Objects ---

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStats {
    pub path: String,
    #[serde(default)]
    pub path_type: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub mtime: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    pub has_more: bool,
    #[serde(default)]
    pub next_offset: String,
}

/// One page of `GET /refs/{ref}/objects/ls`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ObjectStatsList {
    pub pagination: Pagination,
    pub results: Vec<ObjectStats>,
}

// --- Commits ---

/// Body for `POST /branches/{branch}/commits`.
#[derive(Debug, Clone, Serialize)]
pub struct CommitCreation {
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Commit {
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub creation_date: Option<i64>,
}

/// lakeFS error payloads are `{"message": "..."}`.
#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub message: String,
}
