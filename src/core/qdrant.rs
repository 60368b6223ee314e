/// Qdrant snapshot API client
///
/// Only the endpoints the vector pipeline needs: health, collection listing and
/// the per-collection snapshot create/download/delete/upload calls.

use async_trait::async_trait;
use reqwest::{multipart, Client, Method, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use crate::core::error::{BackupError, Result};

const API_KEY_HEADER: &str = "api-key";

/// A server-side snapshot as reported by Qdrant
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SnapshotInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub creation_time: Option<String>,
}

/// Snapshot operations against one Qdrant instance, addressed by base URL
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotApi: Send + Sync {
    async fn health(&self, base_url: &str) -> Result<()>;

    async fn list_collections(&self, base_url: &str) -> Result<Vec<String>>;

    async fn create_snapshot(&self, base_url: &str, collection: &str) -> Result<SnapshotInfo>;

    /// Stream the snapshot to `dest`, returning the number of bytes written
    async fn download_snapshot(
        &self,
        base_url: &str,
        collection: &str,
        snapshot: &str,
        dest: &Path,
    ) -> Result<u64>;

    async fn delete_snapshot(&self, base_url: &str, collection: &str, snapshot: &str) -> Result<()>;

    /// Recover `collection` from a local snapshot file
    async fn upload_snapshot(&self, base_url: &str, collection: &str, archive: &Path) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct CollectionsResult {
    collections: Vec<CollectionDescription>,
}

#[derive(Debug, Deserialize)]
struct CollectionDescription {
    name: String,
}

pub struct QdrantClient {
    client: Client,
    api_key: Option<String>,
}

impl QdrantClient {
    /// No request timeout is set; a hung server hangs the run
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(format!("fwbackup/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, api_key })
    }

    pub fn base_url(host: &str, port: u16) -> String {
        format!("http://{}:{}", host, port)
    }

    fn request(&self, method: Method, url: &Url) -> RequestBuilder {
        let builder = self.client.request(method, url.clone());
        match &self.api_key {
            Some(key) => builder.header(API_KEY_HEADER, key),
            None => builder,
        }
    }

    async fn send(&self, method: Method, url: &Url, builder: RequestBuilder) -> Result<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(BackupError::Api {
            method: method.to_string(),
            endpoint: url.to_string(),
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: Method, url: &Url) -> Result<T> {
        let builder = self.request(method.clone(), url);
        let response = self.send(method, url, builder).await?;
        let parsed: ApiResponse<T> = response.json().await?;
        Ok(parsed.result)
    }
}

/// Append path segments to the base URL, percent-encoding each one
fn endpoint(base_url: &str, segments: &[&str], query: Option<&str>) -> Result<Url> {
    let invalid = || BackupError::Config(format!("invalid Qdrant URL: {}", base_url));
    let mut url = Url::parse(base_url).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|_| invalid())?
        .pop_if_empty()
        .extend(segments);
    url.set_query(query);
    Ok(url)
}

fn snapshot_url(base_url: &str, collection: &str, snapshot: Option<&str>, query: Option<&str>) -> Result<Url> {
    match snapshot {
        Some(name) => endpoint(base_url, &["collections", collection, "snapshots", name], query),
        None => endpoint(base_url, &["collections", collection, "snapshots"], query),
    }
}

/// Multipart part that streams the snapshot from disk
async fn snapshot_part(archive: &Path) -> Result<multipart::Part> {
    let file_name = archive
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "snapshot".to_string());

    let file = tokio::fs::File::open(archive).await?;
    let length = file.metadata().await?.len();
    Ok(multipart::Part::stream_with_length(file, length).file_name(file_name))
}

#[async_trait]
impl SnapshotApi for QdrantClient {
    async fn health(&self, base_url: &str) -> Result<()> {
        let url = endpoint(base_url, &["healthz"], None)?;
        let builder = self.request(Method::GET, &url);
        self.send(Method::GET, &url, builder).await?;
        Ok(())
    }

    async fn list_collections(&self, base_url: &str) -> Result<Vec<String>> {
        let url = endpoint(base_url, &["collections"], None)?;
        let result: CollectionsResult = self.call(Method::GET, &url).await?;
        Ok(result.collections.into_iter().map(|c| c.name).collect())
    }

    async fn create_snapshot(&self, base_url: &str, collection: &str) -> Result<SnapshotInfo> {
        let url = snapshot_url(base_url, collection, None, Some("wait=true"))?;
        self.call(Method::POST, &url).await
    }

    async fn download_snapshot(
        &self,
        base_url: &str,
        collection: &str,
        snapshot: &str,
        dest: &Path,
    ) -> Result<u64> {
        let url = snapshot_url(base_url, collection, Some(snapshot), None)?;
        let builder = self.request(Method::GET, &url);
        let mut response = self.send(Method::GET, &url, builder).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        Ok(written)
    }

    async fn delete_snapshot(&self, base_url: &str, collection: &str, snapshot: &str) -> Result<()> {
        let url = snapshot_url(base_url, collection, Some(snapshot), None)?;
        let _: serde_json::Value = self.call(Method::DELETE, &url).await?;
        Ok(())
    }

    async fn upload_snapshot(&self, base_url: &str, collection: &str, archive: &Path) -> Result<()> {
        let url = endpoint(
            base_url,
            &["collections", collection, "snapshots", "upload"],
            Some("priority=snapshot&wait=true"),
        )?;
        let form = multipart::Form::new().part("snapshot", snapshot_part(archive).await?);

        let builder = self.request(Method::POST, &url).multipart(form);
        self.send(Method::POST, &url, builder).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let base = QdrantClient::base_url("localhost", 6334);
        assert_eq!(base, "http://localhost:6334");
        assert_eq!(
            snapshot_url(&base, "docs", None, None).unwrap().as_str(),
            "http://localhost:6334/collections/docs/snapshots"
        );
        assert_eq!(
            snapshot_url(&base, "docs", None, Some("wait=true")).unwrap().as_str(),
            "http://localhost:6334/collections/docs/snapshots?wait=true"
        );
        assert_eq!(
            snapshot_url(&base, "docs", Some("docs-1.snapshot"), None).unwrap().as_str(),
            "http://localhost:6334/collections/docs/snapshots/docs-1.snapshot"
        );
        assert_eq!(
            endpoint("http://localhost:6334/", &["healthz"], None).unwrap().as_str(),
            "http://localhost:6334/healthz"
        );
    }

    #[test]
    fn test_names_are_percent_encoded() {
        let url = snapshot_url("http://localhost:6334", "docs v1", Some("a/b?c#d.snapshot"), None).unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:6334/collections/docs%20v1/snapshots/a%2Fb%3Fc%23d.snapshot"
        );
        assert_eq!(url.path_segments().unwrap().count(), 4);
    }

    #[test]
    fn test_bad_base_url_is_config_error() {
        let err = endpoint("not a url", &["healthz"], None).unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
        assert!(err.is_environment());
    }

    #[tokio::test]
    async fn test_snapshot_part_streams_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.snapshot");
        assert!(matches!(snapshot_part(&missing).await, Err(BackupError::Io(_))));

        let archive = dir.path().join("docs.snapshot");
        std::fs::write(&archive, vec![7u8; 4096]).unwrap();
        assert!(snapshot_part(&archive).await.is_ok());
    }

    #[test]
    fn test_parse_collections_response() {
        let body = r#"{"result":{"collections":[{"name":"documents"},{"name":"faq"}]},"status":"ok","time":0.001}"#;
        let parsed: ApiResponse<CollectionsResult> = serde_json::from_str(body).unwrap();
        let names: Vec<_> = parsed.result.collections.into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["documents", "faq"]);
    }

    #[test]
    fn test_parse_snapshot_response() {
        let body = r#"{
            "result": {
                "name": "documents-123-2026-10-18-12-00-00.snapshot",
                "creation_time": "2026-10-18T12:00:00",
                "size": 4096,
                "checksum": "ab12"
            },
            "status": "ok",
            "time": 0.2
        }"#;
        let parsed: ApiResponse<SnapshotInfo> = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.result.size, Some(4096));
        assert_eq!(parsed.result.checksum.as_deref(), Some("ab12"));

        let minimal = r#"{"result":{"name":"x.snapshot"}}"#;
        let parsed: ApiResponse<SnapshotInfo> = serde_json::from_str(minimal).unwrap();
        assert_eq!(parsed.result.checksum, None);
    }
}
