//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SwizzleError};
use crate::registry::native_ids;

/// How a storer treats references to instances the shared registry already knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StoreMode {
    /// Known instances are referenced by id and not stored again.
    #[default]
    Lazy,
    /// Every reachable instance is stored again, once per call.
    Eager,
}

/// Tunables of a persistence instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Number of output channels. Must be a power of two.
    pub channel_count: usize,
    /// Minimum capacity of each new chunk buffer region.
    pub buffer_increment: usize,
    /// Initial capacity of the per-call item tables.
    pub initial_item_capacity: usize,
    /// First object id handed out by a fresh object registry.
    pub first_object_id: u64,
    /// First type id handed out for derived types.
    pub first_type_id: u64,
    /// Reference handling of storers created without an explicit mode.
    pub store_mode: StoreMode,
    /// Derive handlers for unregistered types on first store.
    pub lazy_type_registration: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            channel_count: constants::DEFAULT_CHANNEL_COUNT,
            buffer_increment: constants::DEFAULT_BUFFER_INCREMENT,
            initial_item_capacity: constants::DEFAULT_ITEM_CAPACITY,
            first_object_id: constants::FIRST_OBJECT_ID,
            first_type_id: constants::FIRST_TYPE_ID,
            store_mode: StoreMode::Lazy,
            lazy_type_registration: true,
        }
    }
}

impl PersistenceConfig {
    /// Checks the invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.channel_count == 0 || !self.channel_count.is_power_of_two() {
            return Err(SwizzleError::Configuration(format!(
                "channel count {} is not a power of two",
                self.channel_count
            )));
        }
        if self.buffer_increment == 0 {
            return Err(SwizzleError::Configuration(
                "buffer increment must be positive".into(),
            ));
        }
        if self.first_type_id < native_ids::RESERVED {
            return Err(SwizzleError::Configuration(format!(
                "first type id {} lies in the reserved native range below {}",
                self.first_type_id,
                native_ids::RESERVED
            )));
        }
        if self.first_object_id == 0 {
            return Err(SwizzleError::Configuration(
                "object id 0 is the null reference".into(),
            ));
        }
        Ok(())
    }
}

/// Default values.
pub mod constants {
    /// Default number of output channels.
    pub const DEFAULT_CHANNEL_COUNT: usize = 4;
    /// Default chunk buffer increment.
    pub const DEFAULT_BUFFER_INCREMENT: usize = 1024 * 1024;
    /// Default initial item table capacity.
    pub const DEFAULT_ITEM_CAPACITY: usize = 1024;
    /// First object id of a fresh registry.
    pub const FIRST_OBJECT_ID: u64 = 1_000_000_000_000_000_000;
    /// First type id for derived types.
    pub const FIRST_TYPE_ID: u64 = 1_000_000;
}
