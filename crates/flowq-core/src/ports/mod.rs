//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。エンジンとキューはこれらの trait
//! にだけ依存し、実装（InMemoryStore など）は impls に置く。

pub mod clock;
pub mod id_generator;
pub mod reporter;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::reporter::JobReporter;
pub use self::store::{Fields, Store, StoreOps, StreamEntry};
