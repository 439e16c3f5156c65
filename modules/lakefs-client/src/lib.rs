pub mod error;
pub mod types;

pub use error::{LakeFsError, Result};
pub use types::{Commit, CommitCreation, ObjectStats, RepositoryCreation};

use std::collections::BTreeMap;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use types::{ErrorBody, ObjectStatsList};

/// Page size for object listings.
const LIST_PAGE_SIZE: u32 = 1000;

pub struct LakeFsClient {
    client: reqwest::Client,
    api_url: String,
    access_key: String,
    secret_key: String,
}

impl LakeFsClient {
    /// `endpoint` is the server root, e.g. `http://lakefs:8000`.
    pub fn new(endpoint: &str, access_key: String, secret_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: format!("{}/api/v1", endpoint.trim_end_matches('/')),
            access_key,
            secret_key,
        }
    }

    /// Create a repository, treating "already exists" as success.
    pub async fn ensure_repository(&self, creation: &RepositoryCreation) -> Result<()> {
        let url = format!("{}/repositories", self.api_url);
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .json(creation)
            .send()
            .await?;

        match resp.status() {
            StatusCode::CONFLICT => {
                tracing::debug!(repository = %creation.name, "Repository already exists");
                Ok(())
            }
            status if status.is_success() => {
                tracing::info!(repository = %creation.name, "Repository created");
                Ok(())
            }
            status => Err(api_error(status, resp).await),
        }
    }

    /// Upload one object to a branch (staged until the next commit).
    pub async fn upload_object(
        &self,
        repository: &str,
        branch: &str,
        path: &str,
        content: Vec<u8>,
    ) -> Result<ObjectStats> {
        let url = format!(
            "{}/repositories/{}/branches/{}/objects",
            self.api_url, repository, branch
        );
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .query(&[("path", path)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(content)
            .send()
            .await?;

        read_json(resp).await
    }

    /// Download one object from a ref (branch name or commit id).
    pub async fn get_object(&self, repository: &str, reference: &str, path: &str) -> Result<Bytes> {
        let url = format!(
            "{}/repositories/{}/refs/{}/objects",
            self.api_url, repository, reference
        );
        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .query(&[("path", path)])
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(LakeFsError::NotFound(format!("{repository}/{reference}/{path}")));
        }
        if !status.is_success() {
            return Err(api_error(status, resp).await);
        }
        Ok(resp.bytes().await?)
    }

    /// List every object under `prefix`, following pagination.
    pub async fn list_objects(
        &self,
        repository: &str,
        reference: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectStats>> {
        let url = format!(
            "{}/repositories/{}/refs/{}/objects/ls",
            self.api_url, repository, reference
        );
        let amount = LIST_PAGE_SIZE.to_string();
        let mut after = String::new();
        let mut objects = Vec::new();

        loop {
            let resp = self
                .client
                .get(&url)
                .basic_auth(&self.access_key, Some(&self.secret_key))
                .query(&[
                    ("prefix", prefix),
                    ("after", after.as_str()),
                    ("amount", amount.as_str()),
                ])
                .send()
                .await?;

            let page: ObjectStatsList = read_json(resp).await?;
            objects.extend(page.results);

            if !page.pagination.has_more {
                break;
            }
            tracing::debug!(repository, prefix, after = %page.pagination.next_offset, "Fetching next object page");
            after = page.pagination.next_offset;
        }

        Ok(objects)
    }

    /// Commit staged changes on a branch.
    pub async fn commit(
        &self,
        repository: &str,
        branch: &str,
        message: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<Commit> {
        let url = format!(
            "{}/repositories/{}/branches/{}/commits",
            self.api_url, repository, branch
        );
        let body = CommitCreation {
            message: message.to_string(),
            metadata,
        };
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::BAD_REQUEST {
            let err = api_error(status, resp).await;
            if let LakeFsError::Api { ref message, .. } = err {
                if message.contains("no changes") {
                    return Err(LakeFsError::NoChanges {
                        repository: repository.to_string(),
                        branch: branch.to_string(),
                    });
                }
            }
            return Err(err);
        }

        let commit: Commit = read_json_with_status(status, resp).await?;
        tracing::info!(repository, branch, commit_id = %commit.id, "Committed");
        Ok(commit)
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    read_json_with_status(status, resp).await
}

async fn read_json_with_status<T: DeserializeOwned>(
    status: StatusCode,
    resp: reqwest::Response,
) -> Result<T> {
    if !status.is_success() {
        return Err(api_error(status, resp).await);
    }
    let body = resp.text().await?;
    Ok(serde_json::from_str(&body)?)
}

async fn api_error(status: StatusCode, resp: reqwest::Response) -> LakeFsError {
    let body = resp.text().await.unwrap_or_default();
    LakeFsError::Api {
        status: status.as_u16(),
        message: error_message(&body),
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.to_string())
}
