//! In-process store used for single-node runs and tests

use crate::error::{ContestError, Result};
use crate::store::gateway::StoreGateway;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{RwLock, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    List(VecDeque<String>),
    Sorted(HashMap<String, i64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Store backed by a process-local map with TTL support
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

fn wrong_type(key: &str) -> anyhow::Error {
    ContestError::StoreError {
        message: format!("WRONGTYPE operation against key {}", key),
    }
    .into()
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the map, dropping `key` first if it has expired
    fn lock_for(&self, key: &str) -> Result<RwLockWriteGuard<'_, HashMap<String, Entry>>> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| ContestError::InternalError {
                message: "Failed to acquire store write lock".to_string(),
            })?;

        let now = Instant::now();
        if entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            entries.remove(key);
        }
        Ok(entries)
    }

    /// Number of live keys (for tests and stats)
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .map(|entries| entries.values().filter(|e| !e.is_expired(now)).count())
            .unwrap_or(0)
    }

    /// Remaining time-to-live of a key, if any
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries.read().ok().and_then(|entries| {
            entries
                .get(key)
                .and_then(|e| e.expires_at)
                .map(|at| at.saturating_duration_since(now))
        })
    }
}

#[async_trait]
impl StoreGateway for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.lock_for(key)?;
        match entries.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut entries = self.lock_for(key)?;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let mut entries = self.lock_for(key)?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock_for(key)?.remove(key);
        Ok(())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.lock_for(key)?;
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let entries = self.lock_for(key)?;
        match entries.get(key).map(|e| &e.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(h)) => Ok(h.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        let entries = self.lock_for(key)?;
        match entries.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::Hash(h)) => Ok(h.get(field).cloned()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hash_set(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut entries = self.lock_for(key)?;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
        match &mut entry.value {
            Value::Hash(h) => {
                for (field, value) in fields {
                    h.insert(field.clone(), value.clone());
                }
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn hash_create(
        &self,
        key: &str,
        fields: &[(String, String)],
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let mut entries = self.lock_for(key)?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Hash(fields.iter().cloned().collect()),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(true)
    }

    async fn hash_increment(&self, key: &str, field: &str, by: i64) -> Result<i64> {
        let mut entries = self.lock_for(key)?;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
        match &mut entry.value {
            Value::Hash(h) => {
                let current = match h.get(field) {
                    Some(raw) => raw.parse::<i64>().map_err(|_| ContestError::StoreError {
                        message: format!("hash value is not an integer: {}.{}", key, field),
                    })?,
                    None => 0,
                };
                let next = current + by;
                h.insert(field.to_string(), next.to_string());
                Ok(next)
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool> {
        let mut entries = self.lock_for(key)?;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Set(HashSet::new())));
        match &mut entry.value {
            Value::Set(s) => Ok(s.insert(member.to_string())),
            _ => Err(wrong_type(key)),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut entries = self.lock_for(key)?;
        match entries.get_mut(key).map(|e| &mut e.value) {
            None => Ok(false),
            Some(Value::Set(s)) => Ok(s.remove(member)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool> {
        let entries = self.lock_for(key)?;
        match entries.get(key).map(|e| &e.value) {
            None => Ok(false),
            Some(Value::Set(s)) => Ok(s.contains(member)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        let entries = self.lock_for(key)?;
        match entries.get(key).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::Set(s)) => {
                let mut members: Vec<String> = s.iter().cloned().collect();
                members.sort();
                Ok(members)
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn list_push(&self, key: &str, values: &[String]) -> Result<usize> {
        let mut entries = self.lock_for(key)?;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::List(VecDeque::new())));
        match &mut entry.value {
            Value::List(l) => {
                l.extend(values.iter().cloned());
                Ok(l.len())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn list_pop(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.lock_for(key)?;
        match entries.get_mut(key).map(|e| &mut e.value) {
            None => Ok(None),
            Some(Value::List(l)) => Ok(l.pop_front()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn sorted_add(&self, key: &str, member: &str, score: i64) -> Result<()> {
        let mut entries = self.lock_for(key)?;
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Sorted(HashMap::new())));
        match &mut entry.value {
            Value::Sorted(z) => {
                z.insert(member.to_string(), score);
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn sorted_remove(&self, key: &str, member: &str) -> Result<bool> {
        let mut entries = self.lock_for(key)?;
        match entries.get_mut(key).map(|e| &mut e.value) {
            None => Ok(false),
            Some(Value::Sorted(z)) => Ok(z.remove(member).is_some()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn sorted_range_by_score(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<(String, i64)>> {
        let entries = self.lock_for(key)?;
        match entries.get(key).map(|e| &e.value) {
            None => Ok(Vec::new()),
            Some(Value::Sorted(z)) => {
                let mut members: Vec<(String, i64)> = z
                    .iter()
                    .filter(|(_, score)| **score >= min && **score <= max)
                    .map(|(m, s)| (m.clone(), *s))
                    .collect();
                members.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
                Ok(members)
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.entries
            .read()
            .map(|_| ())
            .map_err(|_| {
                ContestError::InternalError {
                    message: "Store lock poisoned".to_string(),
                }
                .into()
            })
    }
}
