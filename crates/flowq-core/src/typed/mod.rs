//! Typed - 型付き processor API
//!
//! ジョブ名と payload 型の対応を型で固定し、名前の typo を防ぎます。
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `DynProcessor` trait - object-safe, `ProcessorRegistry` から名前で取得

pub mod context;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::context::JobContext;
pub use self::handler::{DynProcessor, FnHandler, Handler, ProcessorError, TypedProcessor};
pub use self::registry::{ProcessorRegistry, RegistryError};
pub use self::task::Task;
