use crate::{Store, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const BRPOP_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    List(VecDeque<String>),
    Set(BTreeSet<String>),
    Hash(HashMap<String, String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Text(_) => "string",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Hash(_) => "hash",
        }
    }
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

/// Single-process [`Store`] with the same TTL and typing semantics as the
/// Redis backend. Expired entries are dropped lazily on access; `brpop` is
/// emulated by polling, which is plenty for tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn wrong_type(key: &str, op: &'static str) -> StoreError {
        StoreError::WrongType {
            key: key.to_string(),
            op,
        }
    }

    fn with<T>(
        &self,
        key: &str,
        f: impl FnOnce(Option<&mut Entry>, &mut HashMap<String, Entry>) -> T,
    ) -> T {
        let mut map = self.inner.lock().unwrap();
        let expired = map.get(key).is_some_and(|e| !e.live());
        if expired {
            map.remove(key);
        }
        // Split borrow: hand the entry back alongside the map for inserts.
        match map.remove(key) {
            Some(mut entry) => {
                let out = f(Some(&mut entry), &mut map);
                map.insert(key.to_string(), entry);
                out
            }
            None => f(None, &mut map),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with(key, |entry, _| match entry {
            None => Ok(None),
            Some(Entry {
                value: Value::Text(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(e) => Err(StoreError::WrongType {
                key: key.to_string(),
                op: e.value.kind(),
            }),
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut map = self.inner.lock().unwrap();
        map.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.with(key, |entry, map| {
            if entry.is_some() {
                return Ok(false);
            }
            map.insert(
                key.to_string(),
                Entry {
                    value: Value::Text(value.to_string()),
                    expires_at: Some(Instant::now() + ttl),
                },
            );
            Ok(true)
        })
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.inner.lock().unwrap().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.with(key, |entry, _| Ok(entry.is_some()))
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64, StoreError> {
        self.with(key, |entry, map| match entry {
            Some(Entry {
                value: Value::Text(s),
                ..
            }) => {
                let current: i64 = s.parse().map_err(|_| StoreError::Malformed {
                    key: key.to_string(),
                    reason: format!("not an integer: {s:?}"),
                })?;
                *s = (current + 1).to_string();
                Ok(current + 1)
            }
            Some(_) => Err(Self::wrong_type(key, "incr")),
            None => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Text("1".to_string()),
                        expires_at: ttl.map(|t| Instant::now() + t),
                    },
                );
                Ok(1)
            }
        })
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.with(key, |entry, map| match entry {
            Some(Entry {
                value: Value::Text(s),
                ..
            }) => {
                let current: i64 = s.parse().map_err(|_| StoreError::Malformed {
                    key: key.to_string(),
                    reason: format!("not an integer: {s:?}"),
                })?;
                *s = (current + delta).to_string();
                Ok(current + delta)
            }
            Some(_) => Err(Self::wrong_type(key, "incrby")),
            None => {
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Text(delta.to_string()),
                        expires_at: None,
                    },
                );
                Ok(delta)
            }
        })
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.with(key, |entry, _| match entry {
            Some(e) => {
                e.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        })
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>, StoreError> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.get(key).await?);
        }
        Ok(out)
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        self.with(key, |entry, map| match entry {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                list.push_front(value.to_string());
                Ok(list.len() as u64)
            }
            Some(_) => Err(Self::wrong_type(key, "lpush")),
            None => {
                let mut list = VecDeque::new();
                list.push_front(value.to_string());
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::List(list),
                        expires_at: None,
                    },
                );
                Ok(1)
            }
        })
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with(key, |entry, _| match entry {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.pop_back()),
            Some(_) => Err(Self::wrong_type(key, "rpop")),
            None => Ok(None),
        })
    }

    async fn brpop(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<(String, String)>, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(value) = self.rpop(key).await? {
                return Ok(Some((key.to_string(), value)));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::time::sleep(BRPOP_POLL.min(remaining)).await;
        }
    }

    async fn llen(&self, key: &str) -> Result<u64, StoreError> {
        self.with(key, |entry, _| match entry {
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.len() as u64),
            Some(_) => Err(Self::wrong_type(key, "llen")),
            None => Ok(0),
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.with(key, |entry, map| match entry {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.insert(member.to_string())),
            Some(_) => Err(Self::wrong_type(key, "sadd")),
            None => {
                let mut set = BTreeSet::new();
                set.insert(member.to_string());
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Set(set),
                        expires_at: None,
                    },
                );
                Ok(true)
            }
        })
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.with(key, |entry, _| match entry {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.remove(member)),
            Some(_) => Err(Self::wrong_type(key, "srem")),
            None => Ok(false),
        })
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        self.with(key, |entry, _| match entry {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.len() as u64),
            Some(_) => Err(Self::wrong_type(key, "scard")),
            None => Ok(0),
        })
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.with(key, |entry, _| match entry {
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(Self::wrong_type(key, "smembers")),
            None => Ok(Vec::new()),
        })
    }

    async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        self.with(key, |entry, map| match entry {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => {
                for (field, value) in fields {
                    hash.insert(field.clone(), value.clone());
                }
                Ok(())
            }
            Some(_) => Err(Self::wrong_type(key, "hset")),
            None => {
                let hash: HashMap<String, String> = fields.iter().cloned().collect();
                map.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Hash(hash),
                        expires_at: None,
                    },
                );
                Ok(())
            }
        })
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.with(key, |entry, _| match entry {
            Some(Entry {
                value: Value::Hash(hash),
                ..
            }) => Ok(hash.clone()),
            Some(_) => Err(Self::wrong_type(key, "hgetall")),
            None => Ok(HashMap::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.del("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expires() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert!(store.exists("k").await.unwrap());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_sets_ttl_only_on_create() {
        let store = MemoryStore::new();
        assert_eq!(
            store
                .incr("c", Some(Duration::from_millis(30)))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .incr("c", Some(Duration::from_millis(30)))
                .await
                .unwrap(),
            2
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("c").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incr_on_non_counter_is_wrong_type() {
        let store = MemoryStore::new();
        store.sadd("s", "a").await.unwrap();
        assert!(matches!(
            store.incr("s", None).await,
            Err(StoreError::WrongType { .. })
        ));
    }

    #[tokio::test]
    async fn test_list_is_fifo_from_opposite_ends() {
        let store = MemoryStore::new();
        store.lpush("q", "first").await.unwrap();
        store.lpush("q", "second").await.unwrap();
        assert_eq!(store.llen("q").await.unwrap(), 2);
        assert_eq!(store.rpop("q").await.unwrap().as_deref(), Some("first"));
        assert_eq!(store.rpop("q").await.unwrap().as_deref(), Some("second"));
        assert_eq!(store.rpop("q").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_brpop_times_out_then_delivers() {
        let store = std::sync::Arc::new(MemoryStore::new());
        let empty = store.brpop("q", Duration::from_millis(30)).await.unwrap();
        assert_eq!(empty, None);

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move { store.brpop("q", Duration::from_secs(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.lpush("q", "job").await.unwrap();
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got, Some(("q".to_string(), "job".to_string())));
    }

    #[tokio::test]
    async fn test_set_nx_respects_existing_and_expiry() {
        let store = MemoryStore::new();
        assert!(store
            .set_nx("lock", "a", Duration::from_millis(30))
            .await
            .unwrap());
        assert!(!store
            .set_nx("lock", "b", Duration::from_millis(30))
            .await
            .unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("a"));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store
            .set_nx("lock", "b", Duration::from_millis(30))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_hash_and_set_ops() {
        let store = MemoryStore::new();
        store
            .hset(
                "h",
                &[
                    ("a".to_string(), "1".to_string()),
                    ("b".to_string(), "2".to_string()),
                ],
            )
            .await
            .unwrap();
        let all = store.hgetall("h").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["a"], "1");

        assert!(store.sadd("members", "x").await.unwrap());
        assert!(!store.sadd("members", "x").await.unwrap());
        assert_eq!(store.scard("members").await.unwrap(), 1);
        assert!(store.srem("members", "x").await.unwrap());
        assert_eq!(store.smembers("members").await.unwrap().len(), 0);
    }
}
