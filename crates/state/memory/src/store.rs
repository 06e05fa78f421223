use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::time::Instant;

use tollgate_state::batch::{StateOp, WriteBatch};
use tollgate_state::error::StateError;
use tollgate_state::key::StateKey;
use tollgate_state::store::StateStore;

/// A single entry in the in-memory store.
#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    /// Returns `true` if this entry has passed its TTL deadline.
    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Compute the expiry instant from an optional TTL duration.
fn expiry_from_ttl(ttl: Option<Duration>) -> Option<Instant> {
    ttl.map(|d| Instant::now() + d)
}

/// Prior contents of a key touched by a batch, used to undo a failed batch.
enum Undo {
    Value(String, Option<Entry>),
    Set(String, Option<HashSet<String>>),
}

/// In-memory [`StateStore`] backed by [`DashMap`]s.
///
/// Entries are lazily evicted on read when their TTL has elapsed. Single-key
/// operations and [`get_many`](StateStore::get_many) share a read gate while
/// [`execute`](StateStore::execute) holds it exclusively, so snapshots never
/// observe a partially applied batch.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    data: DashMap<String, Entry>,
    sets: DashMap<String, HashSet<String>>,
    gate: RwLock<()>,
}

impl MemoryStateStore {
    /// Create a new, empty in-memory state store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Render a [`StateKey`] into the string used as the map key.
    fn render_key(key: &StateKey) -> String {
        key.canonical()
    }

    /// Time left before `key` expires. `None` when the key is missing or
    /// has no TTL.
    pub fn ttl_remaining(&self, key: &StateKey) -> Option<Duration> {
        let _gate = self.gate.read();
        let entry = self.data.get(&Self::render_key(key))?;
        if entry.is_expired() {
            return None;
        }
        entry
            .expires_at
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Number of live entries, expired ones excluded.
    pub fn len(&self) -> usize {
        let _gate = self.gate.read();
        self.data.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read_live(&self, rendered: &str) -> Option<String> {
        if let Some(entry) = self.data.get(rendered) {
            if entry.is_expired() {
                drop(entry);
                self.data.remove_if(rendered, |_, entry| entry.is_expired());
                return None;
            }
            return Some(entry.value.clone());
        }
        None
    }

    fn write_value(&self, rendered: String, value: &str, ttl: Option<Duration>) {
        let expires_at = expiry_from_ttl(ttl);
        self.data
            .entry(rendered)
            .and_modify(|entry| {
                value.clone_into(&mut entry.value);
                entry.expires_at = expires_at;
            })
            .or_insert_with(|| Entry {
                value: value.to_owned(),
                expires_at,
            });
    }

    fn remove_value(&self, rendered: &str) -> bool {
        match self.data.remove(rendered) {
            Some((_, entry)) => !entry.is_expired(),
            None => false,
        }
    }

    fn add_to_counter(
        &self,
        rendered: String,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StateError> {
        let expires_at = expiry_from_ttl(ttl);

        // Remove any expired entry first so the counter starts fresh.
        self.data.remove_if(&rendered, |_, entry| entry.is_expired());

        let mut ref_mut = self.data.entry(rendered).or_insert_with(|| Entry {
            value: "0".to_owned(),
            expires_at,
        });

        let current: i64 = ref_mut
            .value
            .parse()
            .map_err(|e: std::num::ParseIntError| {
                StateError::Serialization(format!("counter value is not an integer: {e}"))
            })?;

        let new_value = current.checked_add(delta).ok_or_else(|| {
            StateError::Backend(format!("counter overflow adding {delta} to {current}"))
        })?;
        ref_mut.value = new_value.to_string();
        if let Some(ea) = expires_at {
            ref_mut.expires_at = Some(ea);
        }

        Ok(new_value)
    }

    fn undo_for(&self, op: &StateOp) -> Undo {
        match op {
            StateOp::Set { key, .. } | StateOp::Delete { key } | StateOp::Increment { key, .. } => {
                let rendered = Self::render_key(key);
                let prior = self.data.get(&rendered).map(|e| e.value().clone());
                Undo::Value(rendered, prior)
            }
            StateOp::SetAdd { set, .. } | StateOp::SetRemove { set, .. } => {
                let rendered = Self::render_key(set);
                let prior = self.sets.get(&rendered).map(|s| s.value().clone());
                Undo::Set(rendered, prior)
            }
        }
    }

    fn apply(&self, op: StateOp) -> Result<(), StateError> {
        match op {
            StateOp::Set { key, value, ttl } => {
                self.write_value(Self::render_key(&key), &value, ttl);
            }
            StateOp::Delete { key } => {
                self.remove_value(&Self::render_key(&key));
            }
            StateOp::Increment { key, delta } => {
                self.add_to_counter(Self::render_key(&key), delta, None)?;
            }
            StateOp::SetAdd { set, member } => {
                self.sets
                    .entry(Self::render_key(&set))
                    .or_default()
                    .insert(member);
            }
            StateOp::SetRemove { set, member } => {
                let rendered = Self::render_key(&set);
                if let Some(mut members) = self.sets.get_mut(&rendered) {
                    members.remove(&member);
                }
                self.sets.remove_if(&rendered, |_, members| members.is_empty());
            }
        }
        Ok(())
    }

    fn rollback(&self, undo: Vec<Undo>) {
        // Restore in reverse so the earliest snapshot of a key wins.
        for step in undo.into_iter().rev() {
            match step {
                Undo::Value(rendered, Some(entry)) => {
                    self.data.insert(rendered, entry);
                }
                Undo::Value(rendered, None) => {
                    self.data.remove(&rendered);
                }
                Undo::Set(rendered, Some(members)) => {
                    self.sets.insert(rendered, members);
                }
                Undo::Set(rendered, None) => {
                    self.sets.remove(&rendered);
                }
            }
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &StateKey) -> Result<Option<String>, StateError> {
        let _gate = self.gate.read();
        Ok(self.read_live(&Self::render_key(key)))
    }

    async fn get_many(&self, keys: &[StateKey]) -> Result<Vec<Option<String>>, StateError> {
        let _gate = self.gate.read();
        Ok(keys
            .iter()
            .map(|key| self.read_live(&Self::render_key(key)))
            .collect())
    }

    async fn set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StateError> {
        let _gate = self.gate.read();
        self.write_value(Self::render_key(key), value, ttl);
        Ok(())
    }

    async fn check_and_set(
        &self,
        key: &StateKey,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StateError> {
        let _gate = self.gate.read();
        let rendered = Self::render_key(key);

        // Expired entries count as vacant.
        self.data.remove_if(&rendered, |_, entry| entry.is_expired());

        let was_inserted = match self.data.entry(rendered) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(Entry {
                    value: value.to_owned(),
                    expires_at: expiry_from_ttl(ttl),
                });
                true
            }
        };

        Ok(was_inserted)
    }

    async fn delete(&self, key: &StateKey) -> Result<bool, StateError> {
        let _gate = self.gate.read();
        Ok(self.remove_value(&Self::render_key(key)))
    }

    async fn increment(
        &self,
        key: &StateKey,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, StateError> {
        let _gate = self.gate.read();
        self.add_to_counter(Self::render_key(key), delta, ttl)
    }

    async fn set_contains(&self, set: &StateKey, member: &str) -> Result<bool, StateError> {
        let _gate = self.gate.read();
        Ok(self
            .sets
            .get(&Self::render_key(set))
            .is_some_and(|members| members.contains(member)))
    }

    async fn execute(&self, batch: WriteBatch) -> Result<(), StateError> {
        if batch.is_empty() {
            return Ok(());
        }
        let _gate = self.gate.write();

        let mut undo = Vec::with_capacity(batch.len());
        for op in batch.into_ops() {
            undo.push(self.undo_for(&op));
            if let Err(e) = self.apply(op) {
                self.rollback(undo);
                return Err(e);
            }
        }
        Ok(())
    }
}
