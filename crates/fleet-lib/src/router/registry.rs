//! Agent registry arena
//!
//! Records live in registration order in a slot vector indexed by id.
//! Updates replace a whole slot with a new `Arc<AgentRecord>`; readers
//! holding an older `Arc` keep a consistent view.

use crate::models::AgentRecord;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct AgentRegistry {
    slots: Vec<Arc<AgentRecord>>,
    index: HashMap<String, usize>,
    /// alias -> agent id
    aliases: HashMap<String, String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record, keeping its original position on replace.
    /// The record's hostname becomes an alias for its id.
    pub fn insert(&mut self, record: AgentRecord) -> Arc<AgentRecord> {
        let record = Arc::new(record);

        match self.index.get(&record.id) {
            Some(&slot) => {
                let previous = std::mem::replace(&mut self.slots[slot], record.clone());
                if previous.hostname != record.hostname {
                    self.aliases
                        .retain(|alias, id| !(alias == &previous.hostname && id == &record.id));
                }
            }
            None => {
                self.index.insert(record.id.clone(), self.slots.len());
                self.slots.push(record.clone());
            }
        }

        self.aliases.insert(record.hostname.clone(), record.id.clone());

        record
    }

    /// Remove a record and every alias pointing at it
    pub fn remove(&mut self, id: &str) -> Option<Arc<AgentRecord>> {
        let slot = self.index.remove(id)?;
        let record = self.slots.remove(slot);

        for position in self.index.values_mut() {
            if *position > slot {
                *position -= 1;
            }
        }
        self.aliases.retain(|_, target| target != id);

        Some(record)
    }

    /// Point an extra alias at an existing id
    pub fn add_alias(&mut self, alias: impl Into<String>, id: &str) -> bool {
        if !self.index.contains_key(id) {
            return false;
        }
        self.aliases.insert(alias.into(), id.to_string());
        true
    }

    pub fn get(&self, id: &str) -> Option<Arc<AgentRecord>> {
        self.index.get(id).map(|&slot| self.slots[slot].clone())
    }

    /// Resolve an id or alias. Direct id lookup wins over aliases.
    pub fn resolve(&self, target: &str) -> Option<Arc<AgentRecord>> {
        if let Some(record) = self.get(target) {
            return Some(record);
        }

        self.aliases.get(target).and_then(|id| self.get(id))
    }

    /// Replace a slot with `update(current)`. Returns `(previous, current)`.
    pub fn update<F>(
        &mut self,
        id: &str,
        update: F,
    ) -> Option<(Arc<AgentRecord>, Arc<AgentRecord>)>
    where
        F: FnOnce(&AgentRecord) -> AgentRecord,
    {
        let slot = *self.index.get(id)?;
        let previous = self.slots[slot].clone();
        let current = Arc::new(update(&previous));
        self.slots[slot] = current.clone();
        Some((previous, current))
    }

    /// Records in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<AgentRecord>> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
