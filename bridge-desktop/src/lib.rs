//! # Desktop Bridge Implementations
//!
//! Default adapters for macOS, Windows and Linux:
//! - `HttpClient` using `reqwest` with rustls
//! - `FileSystemAccess` using `tokio::fs` rooted in the platform app directories
//!
//! Remote storage lives in `provider-github`; the media library is always
//! supplied by the host application.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, TokioFileSystem};
//!
//! let http_client = Arc::new(ReqwestHttpClient::new());
//! let fs = Arc::new(TokioFileSystem::new());
//! ```

mod filesystem;
mod http;

pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
