//! GitHub contents API connector
//!
//! Implements [`RemoteStorage`] for one branch of one repository.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::remote::{RemoteEntry, RemoteEntryKind, RemoteFile, RemoteStorage, RepoRef};
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::config::GitHubConfig;
use crate::error::GitHubError;
use crate::types::{
    ApiErrorBody, BlobResponse, CommitResponse, ContentItem, ContentsResponse,
    CreateCommitRequest, DeleteContentRequest, PutContentRequest, PutContentResponse,
    UpdateRefRequest, EMPTY_TREE_SHA,
};

const ACCEPT: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "photo-vault-core";

/// GitHub contents API connector
///
/// # Features
///
/// - Base64 file reads, falling back to the blob endpoint for large files
/// - Conditional writes: a stale SHA surfaces as `VersionConflict`
/// - Exponential backoff on 429, 5xx, secondary rate limits and transport
///   errors
///
/// # Example
///
/// ```ignore
/// use provider_github::{GitHubConfig, GitHubConnector};
/// use bridge_traits::RemoteStorage;
///
/// let config = GitHubConfig::new(RepoRef::new("octo", "photos", "main"), token);
/// let connector = GitHubConnector::new(config, http_client)?;
/// let manifest = connector.get_file("meta/manifest.json").await?;
/// ```
pub struct GitHubConnector {
    config: GitHubConfig,
    http_client: Arc<dyn HttpClient>,
}

impl GitHubConnector {
    pub fn new(
        config: GitHubConfig,
        http_client: Arc<dyn HttpClient>,
    ) -> std::result::Result<Self, GitHubError> {
        config.validate()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    /// Percent-encode every segment, keeping the separators.
    fn encode_path(path: &str) -> String {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn repo_url(&self, suffix: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.config.api_base,
            urlencoding::encode(&self.config.repo.owner),
            urlencoding::encode(&self.config.repo.repo),
            suffix
        )
    }

    fn contents_url(&self, path: &str) -> String {
        self.repo_url(&format!("contents/{}", Self::encode_path(path)))
    }

    fn request(&self, method: HttpMethod, url: String) -> HttpRequest {
        HttpRequest::new(method, url)
            .bearer_token(self.config.token.as_str())
            .header("Accept", ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("User-Agent", USER_AGENT)
            .timeout(self.config.request_timeout)
    }

    fn commit_message(&self, action: &str, path: &str) -> String {
        format!("{}: {} {}", self.config.commit_message_prefix, action, path)
    }

    /// GitHub answers an exhausted secondary rate limit with 403.
    fn is_rate_limited(response: &HttpResponse) -> bool {
        response.status == 429
            || (response.status == 403 && response.header("x-ratelimit-remaining") == Some("0"))
    }

    /// Execute API request with retry logic
    ///
    /// Retries rate limits, server errors and transport failures with
    /// exponential backoff. Any other status is returned to the caller.
    #[instrument(skip(self, request), fields(method = request.method.as_str(), url = %request.url))]
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let max_attempts = self.config.max_attempts;
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.http_client.execute(request.clone()).await {
                Ok(response) if response.is_server_error() || Self::is_rate_limited(&response) => {
                    if attempt >= max_attempts {
                        warn!(status = response.status, attempts = attempt, "GitHub request failed after retries");
                        return Err(GitHubError::RetriesExhausted {
                            status_code: response.status,
                            attempts: attempt,
                        }
                        .into());
                    }
                    warn!(status = response.status, attempt, "GitHub request failed, retrying");
                }
                Ok(response) => {
                    debug!(status = response.status, "GitHub request completed");
                    return Ok(response);
                }
                Err(e) => {
                    if attempt >= max_attempts {
                        warn!(error = %e, attempts = attempt, "GitHub request failed after retries");
                        return Err(match e {
                            BridgeError::Network(_) => e,
                            other => BridgeError::Network(other.to_string()),
                        });
                    }
                    warn!(error = %e, attempt, "GitHub request failed, retrying");
                }
            }

            let backoff = self
                .config
                .retry_base_delay
                .saturating_mul(2u32.saturating_pow(attempt - 1));
            tokio::time::sleep(backoff).await;
        }
    }

    /// Map a non-success status to the error taxonomy.
    fn status_error(response: &HttpResponse, path: &str) -> GitHubError {
        let message = response
            .json::<ApiErrorBody>()
            .map(|body| body.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&response.body).to_string());

        match response.status {
            401 | 403 => GitHubError::Unauthorized(message),
            404 => GitHubError::NotFound {
                path: path.to_string(),
            },
            409 | 422 => GitHubError::Conflict {
                path: path.to_string(),
            },
            status_code => GitHubError::ApiError {
                status_code,
                message,
            },
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(response: &HttpResponse, what: &str) -> Result<T> {
        serde_json::from_slice(&response.body).map_err(|e| {
            GitHubError::ParseError(format!("Failed to parse {}: {}", what, e)).into()
        })
    }

    /// Decode newline-wrapped base64.
    fn decode_base64(encoded: &str) -> Result<Bytes> {
        let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD
            .decode(compact.as_bytes())
            .map(Bytes::from)
            .map_err(|e| GitHubError::ParseError(format!("Invalid base64 content: {}", e)).into())
    }

    async fn fetch_contents(&self, path: &str) -> Result<Option<ContentsResponse>> {
        let url = format!(
            "{}?ref={}",
            self.contents_url(path),
            urlencoding::encode(&self.config.repo.branch)
        );
        let response = self.send(self.request(HttpMethod::Get, url)).await?;

        match response.status {
            200 => Ok(Some(Self::parse(&response, "contents response")?)),
            404 => Ok(None),
            _ => Err(Self::status_error(&response, path).into()),
        }
    }

    /// Files over 1MB come back from the contents endpoint without a body.
    async fn fetch_blob(&self, path: &str, sha: &str) -> Result<Bytes> {
        debug!(path, sha, "Fetching large file through the blob endpoint");
        let url = self.repo_url(&format!("git/blobs/{}", sha));
        let response = self.send(self.request(HttpMethod::Get, url)).await?;

        if response.status != 200 {
            return Err(Self::status_error(&response, path).into());
        }

        let blob: BlobResponse = Self::parse(&response, "blob response")?;
        if blob.encoding != "base64" {
            return Err(GitHubError::ParseError(format!(
                "Unsupported blob encoding {} for {}",
                blob.encoding, path
            ))
            .into());
        }
        Self::decode_base64(&blob.content)
    }

    fn entry_from_item(item: ContentItem) -> Option<RemoteEntry> {
        let kind = match item.kind.as_str() {
            "file" => RemoteEntryKind::File,
            "dir" => RemoteEntryKind::Directory,
            _ => return None,
        };

        Some(RemoteEntry {
            name: item.name,
            path: item.path,
            sha: item.sha,
            size: item.size,
            kind,
        })
    }
}

#[async_trait]
impl RemoteStorage for GitHubConnector {
    fn repo(&self) -> &RepoRef {
        &self.config.repo
    }

    #[instrument(skip(self))]
    async fn get_file(&self, path: &str) -> Result<Option<RemoteFile>> {
        let item = match self.fetch_contents(path).await? {
            Some(ContentsResponse::File(item)) => item,
            Some(ContentsResponse::Directory(_)) => {
                return Err(BridgeError::OperationFailed(format!(
                    "{} is a directory",
                    path
                )))
            }
            None => {
                debug!("Remote file not found");
                return Ok(None);
            }
        };

        let inline = item.content.as_deref().unwrap_or_default();
        let content = if inline.trim().is_empty() && item.size > 0 {
            self.fetch_blob(path, &item.sha).await?
        } else {
            Self::decode_base64(inline)?
        };

        debug!(size = content.len(), sha = %item.sha, "Fetched remote file");
        Ok(Some(RemoteFile {
            path: item.path,
            sha: item.sha,
            content,
        }))
    }

    #[instrument(skip(self, content), fields(size = content.len()))]
    async fn put_file(
        &self,
        path: &str,
        content: Bytes,
        expected_sha: Option<&str>,
    ) -> Result<String> {
        let action = if expected_sha.is_some() { "update" } else { "add" };
        let body = PutContentRequest {
            message: self.commit_message(action, path),
            content: STANDARD.encode(&content),
            branch: &self.config.repo.branch,
            sha: expected_sha,
        };

        let request = self
            .request(HttpMethod::Put, self.contents_url(path))
            .json(&body)?;
        let response = self.send(request).await?;

        if !matches!(response.status, 200 | 201) {
            let error = Self::status_error(&response, path);
            if matches!(error, GitHubError::Conflict { .. }) {
                debug!(path, "Conditional write rejected");
            }
            return Err(error.into());
        }

        let written: PutContentResponse = Self::parse(&response, "put response")?;
        debug!(path = %written.content.path, sha = %written.content.sha, "Wrote remote file");
        Ok(written.content.sha)
    }

    #[instrument(skip(self))]
    async fn delete_file(&self, path: &str, sha: &str) -> Result<()> {
        let body = DeleteContentRequest {
            message: self.commit_message("delete", path),
            sha,
            branch: &self.config.repo.branch,
        };

        let request = self
            .request(HttpMethod::Delete, self.contents_url(path))
            .json(&body)?;
        let response = self.send(request).await?;

        if response.status == 200 {
            debug!("Deleted remote file");
            Ok(())
        } else {
            Err(Self::status_error(&response, path).into())
        }
    }

    #[instrument(skip(self))]
    async fn list_directory(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let items = match self.fetch_contents(path).await? {
            Some(ContentsResponse::Directory(items)) => items,
            Some(ContentsResponse::File(_)) => {
                debug!("Listing target is a file");
                return Ok(Vec::new());
            }
            None => return Ok(Vec::new()),
        };

        let (mut files, dirs): (Vec<_>, Vec<_>) = items
            .into_iter()
            .filter_map(Self::entry_from_item)
            .partition(RemoteEntry::is_file);
        files.extend(dirs);

        debug!(count = files.len(), "Listed remote directory");
        Ok(files)
    }

    #[instrument(skip(self))]
    async fn reset_branch(&self, message: &str) -> Result<()> {
        let branch = self.config.repo.branch.clone();
        info!(branch = %branch, "Resetting remote branch to an empty commit");

        let commit_body = CreateCommitRequest {
            message,
            tree: EMPTY_TREE_SHA,
            parents: Vec::new(),
        };
        let request = self
            .request(HttpMethod::Post, self.repo_url("git/commits"))
            .json(&commit_body)?;
        let response = self.send(request).await?;
        if response.status != 201 && response.status != 200 {
            return Err(Self::status_error(&response, "git/commits").into());
        }
        let commit: CommitResponse = Self::parse(&response, "commit response")?;

        let ref_path = format!("git/refs/heads/{}", Self::encode_path(&branch));
        let ref_body = UpdateRefRequest {
            sha: &commit.sha,
            force: true,
        };
        let request = self
            .request(HttpMethod::Patch, self.repo_url(&ref_path))
            .json(&ref_body)?;
        let response = self.send(request).await?;
        if response.status != 200 {
            return Err(Self::status_error(&response, &ref_path).into());
        }

        info!(commit = %commit.sha, "Remote branch reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use mockall::Sequence;
    use std::collections::HashMap;
    use std::time::Duration;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
            async fn download_stream(&self, url: String) -> Result<Box<dyn tokio::io::AsyncRead + Send + Unpin>>;
        }
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: HashMap::new(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn connector(mock: MockHttpClient) -> GitHubConnector {
        let config = GitHubConfig::new(RepoRef::new("octo", "photos", "main"), "test_token")
            .with_retry(3, Duration::from_millis(1));
        GitHubConnector::new(config, Arc::new(mock)).unwrap()
    }

    fn body_json(request: &HttpRequest) -> serde_json::Value {
        serde_json::from_slice(request.body.as_ref().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_get_file_decodes_wrapped_base64() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.method, HttpMethod::Get);
            assert_eq!(
                req.url,
                "https://api.github.com/repos/octo/photos/contents/images/My%20Trip/a.jpg?ref=main"
            );
            assert_eq!(
                req.headers.get("Authorization"),
                Some(&"Bearer test_token".to_string())
            );
            Ok(response(
                200,
                r#"{"type":"file","name":"a.jpg","path":"images/My Trip/a.jpg","sha":"s1","size":6,"content":"aGVs\nbG8h\n","encoding":"base64"}"#,
            ))
        });

        let file = connector(mock_http)
            .get_file("images/My Trip/a.jpg")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(file.sha, "s1");
        assert_eq!(file.content.as_ref(), b"hello!");
    }

    #[tokio::test]
    async fn test_get_file_not_found_is_none() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(response(404, r#"{"message":"Not Found"}"#)));

        assert!(connector(mock_http)
            .get_file("meta/manifest.json")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_large_file_falls_back_to_blob() {
        let mut mock_http = MockHttpClient::new();
        let mut seq = Sequence::new();
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Ok(response(
                    200,
                    r#"{"type":"file","name":"big.jpg","path":"images/big.jpg","sha":"b1","size":3,"content":"","encoding":"none"}"#,
                ))
            });
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| {
                assert!(req.url.ends_with("/repos/octo/photos/git/blobs/b1"));
                Ok(response(
                    200,
                    r#"{"sha":"b1","size":3,"content":"YWJj\n","encoding":"base64"}"#,
                ))
            });

        let file = connector(mock_http)
            .get_file("images/big.jpg")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.content.as_ref(), b"abc");
    }

    #[tokio::test]
    async fn test_put_file_sends_sha_and_returns_new_sha() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|req| {
            assert_eq!(req.method, HttpMethod::Put);
            let body = body_json(&req);
            assert_eq!(body["sha"], "old");
            assert_eq!(body["branch"], "main");
            assert_eq!(body["content"], "YWJj");
            assert_eq!(body["message"], "photo-vault: update meta/manifest.json");
            Ok(response(
                200,
                r#"{"content":{"path":"meta/manifest.json","sha":"new"}}"#,
            ))
        });

        let sha = connector(mock_http)
            .put_file("meta/manifest.json", Bytes::from_static(b"abc"), Some("old"))
            .await
            .unwrap();
        assert_eq!(sha, "new");
    }

    #[tokio::test]
    async fn test_put_file_conflict_statuses() {
        for status in [409u16, 422] {
            let mut mock_http = MockHttpClient::new();
            mock_http
                .expect_execute()
                .times(1)
                .returning(move |_| Ok(response(status, r#"{"message":"sha does not match"}"#)));

            let err = connector(mock_http)
                .put_file("images/a.jpg", Bytes::from_static(b"x"), Some("stale"))
                .await
                .unwrap_err();
            assert!(err.is_version_conflict(), "status {status}");
        }
    }

    #[tokio::test]
    async fn test_delete_file_maps_statuses() {
        let mut mock_http = MockHttpClient::new();
        let mut seq = Sequence::new();
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| {
                assert_eq!(req.method, HttpMethod::Delete);
                assert_eq!(body_json(&req)["sha"], "s1");
                Ok(response(200, r#"{"commit":{}}"#))
            });
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(response(404, r#"{"message":"Not Found"}"#)));

        let github = connector(mock_http);
        github.delete_file("images/a.jpg", "s1").await.unwrap();
        let err = github.delete_file("images/a.jpg", "s1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_directory_puts_files_first() {
        let mut mock_http = MockHttpClient::new();
        mock_http.expect_execute().times(1).returning(|_| {
            Ok(response(
                200,
                r#"[
                    {"type":"dir","name":"2024","path":"meta/2024","sha":"d1","size":0},
                    {"type":"file","name":"manifest.json","path":"meta/manifest.json","sha":"f1","size":10},
                    {"type":"symlink","name":"link","path":"meta/link","sha":"l1","size":0}
                ]"#,
            ))
        });

        let entries = connector(mock_http).list_directory("meta").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "manifest.json");
        assert!(entries[0].is_file());
        assert_eq!(entries[1].kind, RemoteEntryKind::Directory);
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_empty() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(response(404, r#"{"message":"Not Found"}"#)));

        assert!(connector(mock_http)
            .list_directory("meta")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_reset_branch_creates_orphan_commit_and_forces_ref() {
        let mut mock_http = MockHttpClient::new();
        let mut seq = Sequence::new();
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| {
                assert_eq!(req.method, HttpMethod::Post);
                assert!(req.url.ends_with("/git/commits"));
                let body = body_json(&req);
                assert_eq!(body["tree"], EMPTY_TREE_SHA);
                assert_eq!(body["parents"], serde_json::json!([]));
                Ok(response(201, r#"{"sha":"c1"}"#))
            });
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|req| {
                assert_eq!(req.method, HttpMethod::Patch);
                assert!(req.url.ends_with("/git/refs/heads/main"));
                let body = body_json(&req);
                assert_eq!(body["sha"], "c1");
                assert_eq!(body["force"], true);
                Ok(response(200, r#"{"ref":"refs/heads/main"}"#))
            });

        connector(mock_http).reset_branch("reset").await.unwrap();
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut mock_http = MockHttpClient::new();
        let mut seq = Sequence::new();
        mock_http
            .expect_execute()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Ok(response(502, "bad gateway")));
        mock_http
            .expect_execute()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(response(404, r#"{"message":"Not Found"}"#)));

        assert!(connector(mock_http)
            .get_file("images/a.jpg")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_network_errors() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(3)
            .returning(|_| Err(BridgeError::OperationFailed("connection reset".into())));

        let err = connector(mock_http).get_file("images/a.jpg").await.unwrap_err();
        assert!(matches!(err, BridgeError::Network(_)));
    }

    #[tokio::test]
    async fn test_unauthorized_is_permission_denied() {
        let mut mock_http = MockHttpClient::new();
        mock_http
            .expect_execute()
            .times(1)
            .returning(|_| Ok(response(401, r#"{"message":"Bad credentials"}"#)));

        let err = connector(mock_http)
            .put_file("images/a.jpg", Bytes::from_static(b"x"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::PermissionDenied(ref m) if m == "Bad credentials"));
    }

    #[test]
    fn test_encode_path_keeps_separators() {
        assert_eq!(
            GitHubConnector::encode_path("/images/Été #1/a b.jpg"),
            "images/%C3%89t%C3%A9%20%231/a%20b.jpg"
        );
    }
}
