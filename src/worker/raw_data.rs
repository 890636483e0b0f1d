use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::dataset::DatasetMetadata;
use crate::error::{NodeError, Result};
use crate::scheduler::RawDataId;

/// A dataset staged on this node.
#[derive(Debug, Clone)]
pub struct RawDataAtNode {
    pub raw_data_id: RawDataId,
    /// File the controller asked for, after data-root resolution
    pub original_path: PathBuf,
    /// Node-local copy all processing reads and writes
    pub working_copy: PathBuf,
    pub metadata: DatasetMetadata,
    /// Set once a filter has rewritten the working copy
    pub modified: bool,
}

impl RawDataAtNode {
    pub fn snapshot(&self) -> RawDataSnapshot {
        RawDataSnapshot {
            raw_data_id: self.raw_data_id,
            original_path: self.original_path.clone(),
            metadata: self.metadata.clone(),
            modified: self.modified,
        }
    }
}

/// What the controller gets to see of a staged dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDataSnapshot {
    pub raw_data_id: RawDataId,
    pub original_path: PathBuf,
    pub metadata: DatasetMetadata,
    pub modified: bool,
}

/// Datasets currently open on the node. Owned by the worker thread.
#[derive(Debug, Default)]
pub struct RawDataTable {
    entries: HashMap<RawDataId, RawDataAtNode>,
}

impl RawDataTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: RawDataId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Register a dataset. An id that is already open is left untouched.
    pub fn insert(&mut self, entry: RawDataAtNode) -> Result<()> {
        let id = entry.raw_data_id;
        if self.entries.contains_key(&id) {
            return Err(NodeError::RawDataAlreadyOpen(id));
        }
        self.entries.insert(id, entry);
        Ok(())
    }

    pub fn get(&self, id: RawDataId) -> Result<&RawDataAtNode> {
        self.entries.get(&id).ok_or(NodeError::RawDataNotFound(id))
    }

    pub fn get_mut(&mut self, id: RawDataId) -> Result<&mut RawDataAtNode> {
        self.entries
            .get_mut(&id)
            .ok_or(NodeError::RawDataNotFound(id))
    }

    pub fn remove(&mut self, id: RawDataId) -> Result<RawDataAtNode> {
        self.entries
            .remove(&id)
            .ok_or(NodeError::RawDataNotFound(id))
    }

    /// Open ids in ascending order
    pub fn ids(&self) -> Vec<RawDataId> {
        let mut ids: Vec<RawDataId> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
