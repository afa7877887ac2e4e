//! IdGenerator port - ジョブ ID 生成の抽象化
//!
//! # ULID の特性
//! - 時刻でソート可能
//! - 分散環境で生成可能（調整不要）
//! - `:` を含まないのでキーにそのまま埋め込める

use ulid::Ulid;

use super::clock::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> String;
}

/// ULID based ids, timestamped by the given clock.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> String {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random()).to_string()
    }
}
