// tessera/core/storage/src/wrapper.rs

//! Copy-on-write storage views for nested call frames.
//!
//! One [`StorageWrapper`] serves a whole call tree. Each frame owns a
//! checkpoint: an overlay slot in an arena that points at its parent slot by
//! index. Lookups walk the slot chain, then the optional staging overlay of
//! the call tree, then the block-level overlay shared by every call tree of
//! the block, then the durable backend. A frame that returns successfully
//! folds its slot into the parent; a reverted frame's slot is dropped, which
//! leaves the parent exactly as it was before the call. A finished root
//! folds into the staging overlay when there is one, so its writes stay
//! private until the owner merges them into the block.

use crate::entry::{Entry, TableInfo, SYS_TABLES};
use crate::error::{Result, StorageError};
use crate::interface::StorageInterface;
use crate::overlay::Overlay;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Index of a live overlay slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointId(usize);

impl CheckpointId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cp#{}", self.0)
    }
}

struct Slot {
    parent: Option<CheckpointId>,
    overlay: Overlay,
}

pub struct StorageWrapper {
    backend: Arc<dyn StorageInterface>,
    block: Arc<RwLock<Overlay>>,
    staging: Option<Arc<RwLock<Overlay>>>,
    slots: Vec<Option<Slot>>,
}

impl StorageWrapper {
    pub fn new(backend: Arc<dyn StorageInterface>, block: Arc<RwLock<Overlay>>) -> Self {
        Self {
            backend,
            block,
            staging: None,
            slots: Vec::new(),
        }
    }

    /// Sends finished root checkpoints to `staging` instead of the block.
    pub fn with_staging(mut self, staging: Arc<RwLock<Overlay>>) -> Self {
        self.staging = Some(staging);
        self
    }

    /// Opens a new checkpoint on top of `parent`, or on top of the block
    /// overlay when `parent` is `None`.
    pub fn checkpoint(&mut self, parent: Option<CheckpointId>) -> Result<CheckpointId> {
        if let Some(p) = parent {
            self.slot(p)?;
        }
        self.slots.push(Some(Slot {
            parent,
            overlay: Overlay::new(),
        }));
        Ok(CheckpointId(self.slots.len() - 1))
    }

    pub fn is_live(&self, cp: CheckpointId) -> bool {
        matches!(self.slots.get(cp.0), Some(Some(_)))
    }

    /// Number of live checkpoints.
    pub fn live_checkpoints(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    fn slot(&self, cp: CheckpointId) -> Result<&Slot> {
        self.slots
            .get(cp.0)
            .and_then(Option::as_ref)
            .ok_or(StorageError::InvalidCheckpoint(cp.0))
    }

    fn slot_mut(&mut self, cp: CheckpointId) -> Result<&mut Slot> {
        self.slots
            .get_mut(cp.0)
            .and_then(Option::as_mut)
            .ok_or(StorageError::InvalidCheckpoint(cp.0))
    }

    /// Slot chain from `cp` up to its root.
    fn chain(&self, cp: CheckpointId) -> Result<Vec<CheckpointId>> {
        let mut chain = Vec::new();
        let mut current = Some(cp);
        while let Some(id) = current {
            current = self.slot(id)?.parent;
            chain.push(id);
        }
        Ok(chain)
    }

    pub async fn get_row(&self, cp: CheckpointId, table: &str, key: &str) -> Result<Option<Entry>> {
        for id in self.chain(cp)? {
            if let Some(entry) = self.slot(id)?.overlay.get(table, key) {
                return Ok(visible(entry));
            }
        }
        let from_staging = self
            .staging
            .as_ref()
            .and_then(|staging| staging.read().get(table, key).cloned());
        if let Some(entry) = from_staging {
            return Ok(visible(&entry));
        }
        let from_block = {
            let block = self.block.read();
            block.get(table, key).cloned()
        };
        if let Some(entry) = from_block {
            return Ok(visible(&entry));
        }
        self.backend.get_row(table, key).await
    }

    pub fn set_row(&mut self, cp: CheckpointId, table: &str, key: &str, entry: Entry) -> Result<()> {
        self.slot_mut(cp)?.overlay.put(table, key, entry);
        Ok(())
    }

    pub fn remove_row(&mut self, cp: CheckpointId, table: &str, key: &str) -> Result<()> {
        self.set_row(cp, table, key, Entry::deleted())
    }

    pub async fn open_table(&self, cp: CheckpointId, name: &str) -> Result<Option<TableInfo>> {
        match self.get_row(cp, SYS_TABLES, name).await? {
            Some(entry) => Ok(Some(TableInfo::from_entry(name, &entry)?)),
            None => Ok(None),
        }
    }

    pub async fn create_table(
        &mut self,
        cp: CheckpointId,
        name: &str,
        key_column: &str,
        value_columns: Vec<String>,
    ) -> Result<TableInfo> {
        if self.open_table(cp, name).await?.is_some() {
            return Err(StorageError::TableExists(name.to_string()));
        }
        let info = TableInfo::new(name, key_column, value_columns);
        self.set_row(cp, SYS_TABLES, name, info.to_entry())?;
        Ok(info)
    }

    /// Rewrites the schema row of an existing table.
    pub fn update_table_info(&mut self, cp: CheckpointId, info: &TableInfo) -> Result<()> {
        self.set_row(cp, SYS_TABLES, &info.name, info.to_entry())
    }

    /// Keys of `table` visible from `cp`, ascending.
    pub async fn primary_keys(&self, cp: CheckpointId, table: &str) -> Result<Vec<String>> {
        let mut keys: BTreeSet<String> = self
            .backend
            .get_primary_keys(table)
            .await?
            .into_iter()
            .collect();
        {
            let block = self.block.read();
            apply_keys(&mut keys, &block, table);
        }
        if let Some(staging) = &self.staging {
            apply_keys(&mut keys, &staging.read(), table);
        }
        for id in self.chain(cp)?.into_iter().rev() {
            apply_keys(&mut keys, &self.slot(id)?.overlay, table);
        }
        Ok(keys.into_iter().collect())
    }

    /// Folds `cp` into its parent slot, or for a root checkpoint into the
    /// staging overlay if set and the block overlay otherwise. The slot is
    /// freed.
    pub fn commit_to_parent(&mut self, cp: CheckpointId) -> Result<()> {
        self.slot(cp)?;
        let slot = match self.slots[cp.0].take() {
            Some(slot) => slot,
            None => return Err(StorageError::InvalidCheckpoint(cp.0)),
        };
        match slot.parent {
            Some(parent) => self.slot_mut(parent)?.overlay.merge(slot.overlay),
            None => match &self.staging {
                Some(staging) => staging.write().merge(slot.overlay),
                None => self.block.write().merge(slot.overlay),
            },
        }
        Ok(())
    }

    /// Drops `cp` and every checkpoint opened on top of it.
    pub fn discard(&mut self, cp: CheckpointId) -> Result<()> {
        self.slot(cp)?;
        self.slots[cp.0] = None;
        loop {
            let orphaned: Vec<usize> = self
                .slots
                .iter()
                .enumerate()
                .filter_map(|(i, s)| match s {
                    Some(slot) => match slot.parent {
                        Some(p) if !self.is_live(p) => Some(i),
                        _ => None,
                    },
                    None => None,
                })
                .collect();
            if orphaned.is_empty() {
                break;
            }
            for i in orphaned {
                self.slots[i] = None;
            }
        }
        Ok(())
    }

    /// Pending writes of `cp` alone, without its parents.
    pub fn pending(&self, cp: CheckpointId) -> Result<&Overlay> {
        Ok(&self.slot(cp)?.overlay)
    }
}

fn visible(entry: &Entry) -> Option<Entry> {
    if entry.is_deleted() {
        None
    } else {
        Some(entry.clone())
    }
}

fn apply_keys(keys: &mut BTreeSet<String>, overlay: &Overlay, table: &str) {
    for (key, entry) in overlay.table_rows(table) {
        if entry.is_deleted() {
            keys.remove(key);
        } else {
            keys.insert(key.clone());
        }
    }
}
