//! Impls - ports の実装
//!
//! - **InMemoryStore**: 開発・テスト用の共有ストア

pub mod memory_store;

pub use self::memory_store::{InMemoryStore, Keyspace};
