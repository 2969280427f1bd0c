//! GitHub REST API payloads
//!
//! Only the fields the connector reads are modelled; unknown fields are
//! ignored.

use serde::{Deserialize, Serialize};

/// SHA of the empty tree, present in every repository.
pub const EMPTY_TREE_SHA: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// One item of `GET /repos/{owner}/{repo}/contents/{path}`.
///
/// See: https://docs.github.com/en/rest/repos/contents#get-repository-content
#[derive(Debug, Clone, Deserialize)]
pub struct ContentItem {
    /// `file`, `dir`, `symlink` or `submodule`
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub path: String,
    pub sha: String,
    #[serde(default)]
    pub size: u64,
    /// Base64 with embedded newlines. Empty for files over 1MB.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub encoding: Option<String>,
}

/// A path resolves to an object for files and an array for directories.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ContentsResponse {
    Directory(Vec<ContentItem>),
    File(ContentItem),
}

/// `GET /repos/{owner}/{repo}/git/blobs/{sha}`
#[derive(Debug, Deserialize)]
pub struct BlobResponse {
    pub sha: String,
    #[serde(default)]
    pub size: u64,
    pub content: String,
    pub encoding: String,
}

/// Body of `PUT /repos/{owner}/{repo}/contents/{path}`
#[derive(Debug, Serialize)]
pub struct PutContentRequest<'a> {
    pub message: String,
    pub content: String,
    pub branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
pub struct PutContentResponse {
    pub content: ContentRef,
}

#[derive(Debug, Deserialize)]
pub struct ContentRef {
    pub path: String,
    pub sha: String,
}

/// Body of `DELETE /repos/{owner}/{repo}/contents/{path}`
#[derive(Debug, Serialize)]
pub struct DeleteContentRequest<'a> {
    pub message: String,
    pub sha: &'a str,
    pub branch: &'a str,
}

/// Body of `POST /repos/{owner}/{repo}/git/commits`
#[derive(Debug, Serialize)]
pub struct CreateCommitRequest<'a> {
    pub message: &'a str,
    pub tree: &'a str,
    pub parents: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommitResponse {
    pub sha: String,
}

/// Body of `PATCH /repos/{owner}/{repo}/git/refs/heads/{branch}`
#[derive(Debug, Serialize)]
pub struct UpdateRefRequest<'a> {
    pub sha: &'a str,
    pub force: bool,
}

/// Error body returned with 4xx responses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
}
