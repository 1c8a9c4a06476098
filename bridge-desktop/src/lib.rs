//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! This crate provides production-ready implementations of the storage and
//! network bridges using desktop-appropriate libraries:
//! - `HttpClient` using `reqwest` streaming bodies
//! - `FileSystemAccess` using `tokio::fs`
//! - `KeyValueStore` using an SQLite-backed key-value table
//!
//! The audio engine is always host-provided; there is no desktop default.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SqliteKeyValueStore, TokioFileSystem};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new();
//!     let fs = TokioFileSystem::new();
//!     let store = SqliteKeyValueStore::new(fs.default_database_path()).await.unwrap();
//!
//!     // Use in core configuration
//! }
//! ```

mod filesystem;
mod http;
mod kv_store;

pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
pub use kv_store::SqliteKeyValueStore;
