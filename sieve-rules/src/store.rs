use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::path::FieldPath;
use crate::rule::RuleSet;

/// Named key-value scope that rules can read from (`flow`/`global` sources)
/// and write to (`flow`/`global` outputs).
pub trait ContextStore: Send + Sync {
    /// Value at `path`, `null` when absent.
    fn get(&self, path: &FieldPath) -> Value;

    fn set(&self, path: &FieldPath, value: Value) -> Result<(), String>;
}

/// In-process [`ContextStore`] backed by a JSON object.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: Value) -> Self {
        Self {
            inner: Arc::new(RwLock::new(value)),
        }
    }

    /// Copy of the whole store.
    pub fn snapshot(&self) -> Value {
        self.inner.read().clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_value(Value::Object(Map::new()))
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MemoryStore").field(&*self.inner.read()).finish()
    }
}

impl ContextStore for MemoryStore {
    fn get(&self, path: &FieldPath) -> Value {
        path.lookup(&self.inner.read())
    }

    fn set(&self, path: &FieldPath, value: Value) -> Result<(), String> {
        path.assign(&mut self.inner.write(), value)
    }
}

/// The flow- and process-scoped stores visible to a run.
#[derive(Clone)]
pub struct Stores {
    pub flow: Arc<dyn ContextStore>,
    pub global: Arc<dyn ContextStore>,
}

impl Stores {
    pub fn new(flow: Arc<dyn ContextStore>, global: Arc<dyn ContextStore>) -> Self {
        Self { flow, global }
    }
}

impl Default for Stores {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryStore::new()))
    }
}

impl fmt::Debug for Stores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Versioned history entry for a published rule set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotEntry {
    pub version: u32,
    pub rule_set: Arc<RuleSet>,
    pub created_at: DateTime<Utc>,
    pub updated_by: Option<String>,
}

impl SnapshotEntry {
    fn new(version: u32, rule_set: RuleSet, updated_by: Option<String>) -> Self {
        Self {
            version,
            rule_set: Arc::new(rule_set),
            created_at: Utc::now(),
            updated_by,
        }
    }
}

/// Entries a slot keeps unless configured otherwise.
pub const DEFAULT_HISTORY_LIMIT: usize = 16;

struct SlotState {
    active: Option<Arc<RuleSet>>,
    history: Vec<SnapshotEntry>,
    history_limit: usize,
    last_version: u32,
}

impl Default for SlotState {
    fn default() -> Self {
        Self {
            active: None,
            history: Vec::new(),
            history_limit: DEFAULT_HISTORY_LIMIT,
            last_version: 0,
        }
    }
}

impl SlotState {
    fn prune(&mut self) {
        let excess = self.history.len().saturating_sub(self.history_limit);
        if excess > 0 {
            self.history.drain(..excess);
        }
    }
}

/// Shared slot holding the externally published rule set.
///
/// A run takes one snapshot when it starts, so a publish never changes the
/// rules of a run already in flight.
#[derive(Default, Clone)]
pub struct SnapshotSlot {
    inner: Arc<RwLock<SlotState>>,
}

impl SnapshotSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps at most `limit` history entries (at least one); older entries
    /// are dropped on publish.
    pub fn with_history_limit(self, limit: usize) -> Self {
        {
            let mut inner = self.inner.write();
            inner.history_limit = limit.max(1);
            inner.prune();
        }
        self
    }

    /// Replaces the active rule set, returning the new history entry.
    pub fn publish(&self, rule_set: RuleSet, updated_by: Option<String>) -> SnapshotEntry {
        let mut inner = self.inner.write();
        inner.last_version = inner.last_version.saturating_add(1);
        let entry = SnapshotEntry::new(inner.last_version, rule_set, updated_by);
        inner.active = Some(entry.rule_set.clone());
        inner.history.push(entry.clone());
        inner.prune();
        entry
    }

    /// Drops the active rule set so runs fall back to their local rules.
    /// History is kept.
    pub fn clear(&self) {
        self.inner.write().active = None;
    }

    pub fn current(&self) -> Option<Arc<RuleSet>> {
        self.inner.read().active.clone()
    }

    pub fn history(&self) -> Vec<SnapshotEntry> {
        self.inner.read().history.clone()
    }

    pub fn latest(&self) -> Option<SnapshotEntry> {
        self.inner.read().history.last().cloned()
    }
}

impl fmt::Debug for SnapshotSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("SnapshotSlot")
            .field("active", &inner.active.is_some())
            .field("versions", &inner.history.len())
            .finish()
    }
}
