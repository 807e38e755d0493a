//! The type dictionary: every layout ever assigned a type id.
//!
//! The dictionary is the persistent memory of the type registry. Current types and legacy
//! types live side by side; a tid whose layout no longer matches the registered type of the
//! same name is a legacy type and is mapped on load.
//!
//! Snapshots are plain bincode, so callers can keep the dictionary next to their data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SwizzleError};
use crate::graph::Tid;
use crate::layout::TypeDescription;

/// Mapping from type id to persisted layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDictionary {
    entries: BTreeMap<Tid, TypeDescription>,
}

impl TypeDictionary {
    /// An empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `description` under `tid`.
    ///
    /// Recording an identical entry again is a no-op; a different layout under a known tid
    /// is rejected.
    pub fn insert(&mut self, tid: Tid, description: TypeDescription) -> Result<()> {
        match self.entries.get(&tid) {
            Some(existing) if *existing == description => Ok(()),
            Some(existing) => Err(SwizzleError::Configuration(format!(
                "type id {tid} is already assigned to {}",
                existing.type_name
            ))),
            None => {
                self.entries.insert(tid, description);
                Ok(())
            }
        }
    }

    /// The layout recorded under `tid`.
    pub fn get(&self, tid: Tid) -> Option<&TypeDescription> {
        self.entries.get(&tid)
    }

    /// All tids recorded for `type_name`, oldest first.
    pub fn tids_for_name<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = Tid> + 'a {
        self.entries
            .iter()
            .filter(move |(_, d)| d.type_name == type_name)
            .map(|(tid, _)| *tid)
    }

    /// The newest tid whose layout equals `description`, name included.
    pub fn find(&self, description: &TypeDescription) -> Option<Tid> {
        let fingerprint = description.layout_fingerprint();
        self.entries
            .iter()
            .rev()
            .find(|(_, d)| d.layout_fingerprint() == fingerprint && *d == description)
            .map(|(tid, _)| *tid)
    }

    /// The smallest unused tid at or above `floor`.
    pub fn next_tid(&self, floor: u64) -> Tid {
        let highest = self.entries.keys().next_back().map_or(0, |t| t.as_u64() + 1);
        Tid::new(highest.max(floor))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in tid order.
    pub fn iter(&self) -> impl Iterator<Item = (Tid, &TypeDescription)> {
        self.entries.iter().map(|(tid, d)| (*tid, d))
    }

    /// Encodes the dictionary.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| SwizzleError::Serialization(e.to_string()))
    }

    /// Decodes a dictionary produced by [`TypeDictionary::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (dictionary, _) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| SwizzleError::Serialization(e.to_string()))?;
        Ok(dictionary)
    }
}
