//! lineage-store — SQLite implementations of the lineage storage contracts.
//!
//! All SQL runs on `tokio-rusqlite`'s dedicated connection thread, so
//! every call is serialized and per-record visibility is all-or-nothing.
//! Embedding vectors are stored as little-endian `f32` blobs, optionally
//! sealed with AES-256-GCM (see [`crypto::VaultKey`]).

pub mod codec;
pub mod crypto;
pub mod db;
pub mod embeddings;
pub mod persons;
pub mod trees;

pub use crypto::VaultKey;
pub use db::open_database;
pub use embeddings::SqliteEmbeddingStore;
pub use persons::SqlitePersonStore;
pub use trees::SqliteTreeStore;
