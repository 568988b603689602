//! SQLite + Object Storage Backend
//!
//! This crate provides a content-addressable storage target that uses
//! SQLite for blob and tag metadata and pluggable object storage
//! (S3/MinIO/local filesystem/memory) for blob data.
//!
//! # Features
//!
//! - Content addressed by OCI digest, verified on every push
//! - SQLite for existence checks and tag resolution without touching objects
//! - Multiple storage backends: S3, MinIO, local filesystem, in-memory
//! - Recovery support: rebuild blob metadata from object storage
//!
//! # Example
//!
//! ```rust,no_run
//! use conveyor_object_store::ObjectStore;
//! use common::storage::Resolver;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ObjectStore::new_local(Path::new("/tmp/conveyor")).await?;
//! let root = store.resolve("v1").await?;
//! println!("v1 -> {root}");
//! # Ok(())
//! # }
//! ```

mod database;
mod error;
mod object_store;
mod storage;

pub use error::{ObjectStoreError, Result};
pub use crate::object_store::{ObjectStore, RecoveryStats};
pub use storage::ObjectStoreConfig;
