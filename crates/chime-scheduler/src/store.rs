use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;

use crate::error::{Result, SchedulerError};
use crate::types::{Trigger, TriggerId, TriggerRecord};

/// Where triggers live between edits. The storage format is up to the
/// implementation; the service only needs these operations.
pub trait TriggerStore: Send + Sync {
    /// Store a draft and give it a stable id. Saved triggers keep theirs.
    fn insert(&self, trigger: Trigger) -> Result<Trigger>;

    fn get(&self, id: u32) -> Result<Option<Trigger>>;

    /// Replace an existing trigger with a new value of the same id.
    fn update(&self, trigger: Trigger) -> Result<()>;

    fn remove(&self, id: u32) -> Result<Option<Trigger>>;

    /// All triggers ordered by id.
    fn list(&self) -> Result<Vec<Trigger>>;
}

/// Process-local store, used by the daemon and in tests.
#[derive(Debug, Default)]
pub struct MemoryTriggerStore {
    rows: DashMap<u32, Trigger>,
    last_id: AtomicU32,
}

impl MemoryTriggerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load boundary records. Invalid records are rejected as a whole.
    pub fn from_records(records: impl IntoIterator<Item = TriggerRecord>) -> Result<Self> {
        let store = Self::new();
        for record in records {
            store.insert(Trigger::try_from(record)?)?;
        }
        Ok(store)
    }

    fn next_id(&self) -> Result<NonZeroU32> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        NonZeroU32::new(id).ok_or(SchedulerError::Draft)
    }
}

impl TriggerStore for MemoryTriggerStore {
    fn insert(&self, trigger: Trigger) -> Result<Trigger> {
        let trigger = match trigger.id {
            TriggerId::Draft => trigger.with_id(TriggerId::Saved(self.next_id()?)),
            TriggerId::Saved(id) => {
                self.last_id.fetch_max(id.get(), Ordering::SeqCst);
                trigger
            }
        };
        if let Some(id) = trigger.id.saved() {
            self.rows.insert(id, trigger.clone());
        }
        Ok(trigger)
    }

    fn get(&self, id: u32) -> Result<Option<Trigger>> {
        Ok(self.rows.get(&id).map(|t| t.value().clone()))
    }

    fn update(&self, trigger: Trigger) -> Result<()> {
        let id = trigger.id.saved().ok_or(SchedulerError::Draft)?;
        match self.rows.get_mut(&id) {
            Some(mut row) => {
                *row = trigger;
                Ok(())
            }
            None => Err(SchedulerError::TriggerNotFound { id }),
        }
    }

    fn remove(&self, id: u32) -> Result<Option<Trigger>> {
        Ok(self.rows.remove(&id).map(|(_, t)| t))
    }

    fn list(&self) -> Result<Vec<Trigger>> {
        let mut all: Vec<Trigger> = self.rows.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|t| t.id.saved());
        Ok(all)
    }
}
