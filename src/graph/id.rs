use std::fmt;

use serde::{Deserialize, Serialize};

/// Persistent identity of a stored instance. `Oid::NULL` (0) encodes a null reference.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Oid(u64);

impl Oid {
    /// The null reference.
    pub const NULL: Oid = Oid(0);

    /// Wraps a raw object id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true for the null reference.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Selects one of `channel_count` output channels. `channel_count` must be a power of two.
    pub const fn channel(self, channel_count: usize) -> usize {
        (self.0 & (channel_count as u64 - 1)) as usize
    }
}

impl fmt::Debug for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.0)
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Identifier of a type layout and the handler that reads and writes it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tid(u64);

impl Tid {
    /// Wraps a raw type id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw numeric value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tid({})", self.0)
    }
}

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
