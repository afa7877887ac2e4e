//! Store port - 共有ストアの抽象化
//!
//! エンジンは型付きの値（hash, set, ordered set, list, stream）を持つ
//! key/value ストアの上で動きます。`StoreOps` がプリミティブの集合で、
//! `Store` はエンジンが依存する唯一の保証を足します:
//! [`Store::atomically`] に渡した closure は、他のすべての呼び出しに対して
//! 不可分な 1 ステップとして実行される。
//!
//! # 設計原則
//! - 削除系のプリミティブは対象がなければ何もしない
//! - 最後の要素を失ったコレクションは消える（`exists` が false になる）
//! - ordered set の score は整数（ミリ秒のタイムスタンプ）

use std::collections::HashMap;

use async_trait::async_trait;

/// Flat field list of a hash write or stream entry.
pub type Fields = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Fields,
}

/// Primitive operations available inside one atomic invocation.
pub trait StoreOps: Send {
    fn exists(&self, key: &str) -> bool;

    /// Delete keys; returns how many existed.
    fn del(&mut self, keys: &[String]) -> usize;

    // hash
    fn hget(&self, key: &str, field: &str) -> Option<String>;
    fn hgetall(&self, key: &str) -> HashMap<String, String>;
    /// Returns true if the field was new.
    fn hset(&mut self, key: &str, field: &str, value: &str) -> bool;
    fn hdel(&mut self, key: &str, field: &str) -> bool;

    fn hset_all(&mut self, key: &str, fields: &[(String, String)]) {
        for (field, value) in fields {
            self.hset(key, field, value);
        }
    }

    // set
    /// Returns true if the member was added.
    fn sadd(&mut self, key: &str, member: &str) -> bool;
    /// Returns true only if the member was present.
    fn srem(&mut self, key: &str, member: &str) -> bool;
    fn sismember(&self, key: &str, member: &str) -> bool;
    fn scard(&self, key: &str) -> usize;
    /// Members in lexical order.
    fn smembers(&self, key: &str) -> Vec<String>;

    // ordered set
    /// Insert or update the score; returns true if the member was new.
    fn zadd(&mut self, key: &str, score: i64, member: &str) -> bool;
    fn zrem(&mut self, key: &str, member: &str) -> bool;
    fn zscore(&self, key: &str, member: &str) -> Option<i64>;
    fn zcard(&self, key: &str) -> usize;
    /// Members with `score <= max`, ascending by (score, member).
    fn zrange_by_score(&self, key: &str, max: i64) -> Vec<(String, i64)>;

    /// Lowest-scored entry.
    fn zfirst(&self, key: &str) -> Option<(String, i64)> {
        self.zrange_by_score(key, i64::MAX).into_iter().next()
    }

    // list
    fn lpush(&mut self, key: &str, value: &str) -> usize;
    fn rpush(&mut self, key: &str, value: &str) -> usize;
    fn rpop(&mut self, key: &str) -> Option<String>;
    /// Remove every occurrence of `value`; returns how many were removed.
    fn lrem(&mut self, key: &str, value: &str) -> usize;
    fn llen(&self, key: &str) -> usize;
    /// Whole list, left to right.
    fn lrange(&self, key: &str) -> Vec<String>;

    fn lcontains(&self, key: &str, value: &str) -> bool {
        self.lrange(key).iter().any(|item| item == value)
    }

    // stream
    /// Append an entry and return its generated id (`<ms>-<seq>`).
    fn xadd(&mut self, key: &str, fields: Fields) -> String;
    /// Entries with an id strictly after `after` (all entries when `None`).
    fn xrange(&self, key: &str, after: Option<&str>) -> Vec<StreamEntry>;
}

/// A store that can run a closure atomically.
///
/// The closure receives exclusive access to the primitives for its whole
/// duration, including any cascade it performs.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn atomically<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut dyn StoreOps) -> R + Send,
        R: Send;
}
