//! InMemoryStore - 開発・テスト用のストア
//!
//! # 実装詳細
//! - `Keyspace` は型付きの値を `HashMap<String, Value>` で保持する
//! - `InMemoryStore` はそれを `tokio::sync::Mutex` で包む。closure 全体で
//!   guard を握るので `atomically` は不可分になる
//! - 型の違うキーの読み取りは空として扱い、書き込みは warn を出して何もしない

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use crate::ports::{Fields, Store, StoreOps, StreamEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct StreamId {
    ms: i64,
    seq: u64,
}

impl StreamId {
    fn parse(raw: &str) -> Option<Self> {
        let (ms, seq) = raw.split_once('-')?;
        Some(Self {
            ms: ms.parse().ok()?,
            seq: seq.parse().ok()?,
        })
    }

    fn render(self) -> String {
        format!("{}-{}", self.ms, self.seq)
    }
}

#[derive(Debug, Clone)]
enum Value {
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
    SortedSet(HashMap<String, i64>),
    List(VecDeque<String>),
    Stream(Vec<(StreamId, Fields)>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::SortedSet(_) => "zset",
            Value::List(_) => "list",
            Value::Stream(_) => "stream",
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Value::Hash(map) => map.is_empty(),
            Value::Set(set) => set.is_empty(),
            Value::SortedSet(map) => map.is_empty(),
            Value::List(list) => list.is_empty(),
            Value::Stream(entries) => entries.is_empty(),
        }
    }
}

/// Typed key/value space. Implements the primitive set directly so engine
/// routines can be exercised without going through the async store.
#[derive(Debug, Default)]
pub struct Keyspace {
    values: HashMap<String, Value>,
    last_stream_id: Option<StreamId>,
}

macro_rules! typed_access {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty) => {
        fn $get(&self, key: &str) -> Option<&$ty> {
            match self.values.get(key)? {
                Value::$variant(inner) => Some(inner),
                other => {
                    warn!(key, found = other.type_name(), "wrong type on read");
                    None
                }
            }
        }

        fn $get_mut(&mut self, key: &str) -> Option<&mut $ty> {
            let value = self
                .values
                .entry(key.to_string())
                .or_insert_with(|| Value::$variant(Default::default()));
            match value {
                Value::$variant(inner) => Some(inner),
                other => {
                    warn!(key, found = other.type_name(), "wrong type on write");
                    None
                }
            }
        }
    };
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every key currently present, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    typed_access!(hash, hash_mut, Hash, HashMap<String, String>);
    typed_access!(set, set_mut, Set, BTreeSet<String>);
    typed_access!(zset, zset_mut, SortedSet, HashMap<String, i64>);
    typed_access!(list, list_mut, List, VecDeque<String>);
    typed_access!(stream, stream_mut, Stream, Vec<(StreamId, Fields)>);

    /// Drop `key` if the last write left it empty.
    fn prune(&mut self, key: &str) {
        if self.values.get(key).is_some_and(Value::is_empty) {
            self.values.remove(key);
        }
    }

    fn next_stream_id(&mut self, now_ms: i64) -> StreamId {
        let id = match self.last_stream_id {
            Some(last) if last.ms >= now_ms => StreamId {
                ms: last.ms,
                seq: last.seq + 1,
            },
            _ => StreamId { ms: now_ms, seq: 0 },
        };
        self.last_stream_id = Some(id);
        id
    }
}

impl StoreOps for Keyspace {
    fn exists(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn del(&mut self, keys: &[String]) -> usize {
        keys.iter()
            .filter(|key| self.values.remove(key.as_str()).is_some())
            .count()
    }

    fn hget(&self, key: &str, field: &str) -> Option<String> {
        self.hash(key)?.get(field).cloned()
    }

    fn hgetall(&self, key: &str) -> HashMap<String, String> {
        self.hash(key).cloned().unwrap_or_default()
    }

    fn hset(&mut self, key: &str, field: &str, value: &str) -> bool {
        let added = match self.hash_mut(key) {
            Some(map) => map.insert(field.to_string(), value.to_string()).is_none(),
            None => false,
        };
        self.prune(key);
        added
    }

    fn hdel(&mut self, key: &str, field: &str) -> bool {
        if !self.exists(key) {
            return false;
        }
        let removed = self
            .hash_mut(key)
            .is_some_and(|map| map.remove(field).is_some());
        self.prune(key);
        removed
    }

    fn sadd(&mut self, key: &str, member: &str) -> bool {
        let added = self
            .set_mut(key)
            .is_some_and(|set| set.insert(member.to_string()));
        self.prune(key);
        added
    }

    fn srem(&mut self, key: &str, member: &str) -> bool {
        if !self.exists(key) {
            return false;
        }
        let removed = self.set_mut(key).is_some_and(|set| set.remove(member));
        self.prune(key);
        removed
    }

    fn sismember(&self, key: &str, member: &str) -> bool {
        self.set(key).is_some_and(|set| set.contains(member))
    }

    fn scard(&self, key: &str) -> usize {
        self.set(key).map_or(0, BTreeSet::len)
    }

    fn smembers(&self, key: &str) -> Vec<String> {
        self.set(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn zadd(&mut self, key: &str, score: i64, member: &str) -> bool {
        let added = self
            .zset_mut(key)
            .is_some_and(|zset| zset.insert(member.to_string(), score).is_none());
        self.prune(key);
        added
    }

    fn zrem(&mut self, key: &str, member: &str) -> bool {
        if !self.exists(key) {
            return false;
        }
        let removed = self
            .zset_mut(key)
            .is_some_and(|zset| zset.remove(member).is_some());
        self.prune(key);
        removed
    }

    fn zscore(&self, key: &str, member: &str) -> Option<i64> {
        self.zset(key)?.get(member).copied()
    }

    fn zcard(&self, key: &str) -> usize {
        self.zset(key).map_or(0, HashMap::len)
    }

    fn zrange_by_score(&self, key: &str, max: i64) -> Vec<(String, i64)> {
        let Some(zset) = self.zset(key) else {
            return Vec::new();
        };
        let mut entries: Vec<(String, i64)> = zset
            .iter()
            .filter(|(_, score)| **score <= max)
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }

    fn lpush(&mut self, key: &str, value: &str) -> usize {
        let len = self.list_mut(key).map_or(0, |list| {
            list.push_front(value.to_string());
            list.len()
        });
        self.prune(key);
        len
    }

    fn rpush(&mut self, key: &str, value: &str) -> usize {
        let len = self.list_mut(key).map_or(0, |list| {
            list.push_back(value.to_string());
            list.len()
        });
        self.prune(key);
        len
    }

    fn rpop(&mut self, key: &str) -> Option<String> {
        if !self.exists(key) {
            return None;
        }
        let popped = self.list_mut(key).and_then(VecDeque::pop_back);
        self.prune(key);
        popped
    }

    fn lrem(&mut self, key: &str, value: &str) -> usize {
        if !self.exists(key) {
            return 0;
        }
        let removed = self.list_mut(key).map_or(0, |list| {
            let before = list.len();
            list.retain(|item| item != value);
            before - list.len()
        });
        self.prune(key);
        removed
    }

    fn llen(&self, key: &str) -> usize {
        self.list(key).map_or(0, VecDeque::len)
    }

    fn lrange(&self, key: &str) -> Vec<String> {
        self.list(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn xadd(&mut self, key: &str, fields: Fields) -> String {
        let id = self.next_stream_id(chrono::Utc::now().timestamp_millis());
        if let Some(entries) = self.stream_mut(key) {
            entries.push((id, fields));
        }
        id.render()
    }

    fn xrange(&self, key: &str, after: Option<&str>) -> Vec<StreamEntry> {
        let after = after.and_then(StreamId::parse);
        self.stream(key)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|(id, _)| after.is_none_or(|after| *id > after))
                    .map(|(id, fields)| StreamEntry {
                        id: id.render(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Store backed by a process-local [`Keyspace`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    keyspace: Arc<Mutex<Keyspace>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every key, for inspection in tests and demos.
    pub async fn keys(&self) -> Vec<String> {
        self.keyspace.lock().await.keys()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn atomically<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut dyn StoreOps) -> R + Send,
        R: Send,
    {
        let mut keyspace = self.keyspace.lock().await;
        f(&mut *keyspace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removing_last_member_deletes_the_key() {
        let mut ks = Keyspace::new();
        assert!(ks.sadd("deps", "a"));
        assert!(!ks.sadd("deps", "a"));
        assert!(ks.exists("deps"));

        assert!(ks.srem("deps", "a"));
        assert!(!ks.srem("deps", "a"));
        assert!(!ks.exists("deps"));
        assert_eq!(ks.scard("deps"), 0);
    }

    #[test]
    fn removals_on_missing_keys_do_not_create_them() {
        let mut ks = Keyspace::new();
        assert!(!ks.hdel("h", "f"));
        assert!(!ks.zrem("z", "m"));
        assert_eq!(ks.lrem("l", "v"), 0);
        assert_eq!(ks.rpop("l"), None);
        assert!(ks.keys().is_empty());
    }

    #[test]
    fn lists_push_and_pop_at_both_ends() {
        let mut ks = Keyspace::new();
        ks.lpush("wait", "1");
        ks.lpush("wait", "2");
        ks.rpush("wait", "0");

        assert_eq!(ks.lrange("wait"), vec!["2", "1", "0"]);
        assert_eq!(ks.rpop("wait").as_deref(), Some("0"));
        assert_eq!(ks.lrem("wait", "2"), 1);
        assert_eq!(ks.lrange("wait"), vec!["1"]);
    }

    #[test]
    fn sorted_set_orders_by_score_then_member() {
        let mut ks = Keyspace::new();
        ks.zadd("z", 20, "b");
        ks.zadd("z", 10, "c");
        ks.zadd("z", 20, "a");

        let all: Vec<String> = ks.zrange_by_score("z", i64::MAX).into_iter().map(|(m, _)| m).collect();
        assert_eq!(all, vec!["c", "a", "b"]);
        assert_eq!(ks.zrange_by_score("z", 15).len(), 1);
        assert_eq!(ks.zfirst("z"), Some(("c".to_string(), 10)));
    }

    #[test]
    fn stream_ids_are_monotonic() {
        let mut ks = Keyspace::new();
        let first = ks.xadd("events", vec![("event".into(), "a".into())]);
        let second = ks.xadd("events", vec![("event".into(), "b".into())]);

        assert!(StreamId::parse(&second) > StreamId::parse(&first));
        assert_eq!(ks.xrange("events", None).len(), 2);
        let tail = ks.xrange("events", Some(&first));
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].id, second);
    }

    #[test]
    fn wrong_type_reads_empty_and_writes_nothing() {
        let mut ks = Keyspace::new();
        ks.hset("k", "f", "v");

        assert_eq!(ks.scard("k"), 0);
        assert!(!ks.sadd("k", "m"));
        assert_eq!(ks.hget("k", "f").as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn atomically_exposes_the_keyspace() {
        let store = InMemoryStore::new();
        store.atomically(|ops| ops.rpush("l", "x")).await;
        let len = store.atomically(|ops| ops.llen("l")).await;
        assert_eq!(len, 1);
        assert_eq!(store.keys().await, vec!["l".to_string()]);
    }
}
