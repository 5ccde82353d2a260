//! Which mutations a reconciliation may perform.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Enabled-operation flags, fixed for one reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Insert desired records whose key is absent from the snapshot.
    pub allow_add: bool,
    /// Overwrite snapshot records whose key is present in the desired list.
    pub allow_update: bool,
    /// Delete snapshot records whose key is absent from the desired list.
    pub allow_remove: bool,
}

impl Policy {
    pub const fn new(allow_add: bool, allow_update: bool, allow_remove: bool) -> Self {
        Self {
            allow_add,
            allow_update,
            allow_remove,
        }
    }

    /// Add, update and remove: the store ends up mirroring the list.
    pub const fn sync() -> Self {
        Self::new(true, true, true)
    }

    /// Add and update, never remove.
    pub const fn add_or_update() -> Self {
        Self::new(true, true, false)
    }

    /// Add and remove, never touch existing records.
    pub const fn add_or_remove() -> Self {
        Self::new(true, false, true)
    }

    /// True when no flag is set; reconciling is then a read-only no-op.
    pub fn is_read_only(&self) -> bool {
        !(self.allow_add || self.allow_update || self.allow_remove)
    }
}

impl FromStr for Policy {
    type Err = Error;

    /// Parse one of `sync`, `add-or-update` or `add-or-remove`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::sync()),
            "add-or-update" => Ok(Self::add_or_update()),
            "add-or-remove" => Ok(Self::add_or_remove()),
            other => Err(Error::invalid_argument(format!("unknown policy '{}'", other))),
        }
    }
}
