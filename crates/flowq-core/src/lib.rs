//! flowq-core
//!
//! Job queue with parent/child flows over a shared key/value store.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（keys, job records, states, events, flows, removal modes, errors）
//! - **ports**: 抽象化レイヤー（`Store`/`StoreOps`, `Clock`, `IdGenerator`, `JobReporter`）
//! - **impls**: ports の実装（`InMemoryStore`）
//! - **engine**: 不可分な遷移（依存の追跡, cascade, lifecycle）
//! - **queue**: 1 namespace の async facade と job lease
//! - **typed**: `Task` / `Handler<T>` processor と registry
//! - **worker**: `WorkerGroup`, `JobRunner`, `InlineRunner`
//! - **sandbox**: supervisor/child プロトコルと `SandboxRunner`
//! - **config** / **observability**: 設定, counts, tracing の初期化

pub mod config;
pub mod domain;
pub mod engine;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod sandbox;
pub mod typed;
pub mod worker;

pub use self::config::{LogConfig, LogFormat, QueueConfig};
pub use self::domain::{FlowError, FlowResult};
pub use self::queue::{JobLease, Queue};
