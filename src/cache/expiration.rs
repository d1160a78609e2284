use std::fmt;

use serde::{Deserialize, Serialize};

/// What a read does with a row whose TTL has elapsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpirationAction {
    /// Re-pull the row from the backing table and restart its TTL
    #[default]
    Download,
    /// Evict the row and report it as not found
    Delete,
}

impl fmt::Display for ExpirationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpirationAction::Download => write!(f, "download"),
            ExpirationAction::Delete => write!(f, "delete"),
        }
    }
}
