//! Named credential sets on the remote platform.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::BillSyncError;

/// Remote account whose data a run mirrors.
///
/// Every stored customer, charge and run belongs to exactly one account, and
/// reconciliation never crosses accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Account {
    Primary,
    Alternate,
}

impl Account {
    /// All known accounts, in configuration order.
    pub const ALL: [Self; 2] = [Self::Primary, Self::Alternate];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Alternate => "alternate",
        }
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Account {
    type Err = BillSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" | "principal" => Ok(Self::Primary),
            "alternate" | "alternativo" => Ok(Self::Alternate),
            other => Err(BillSyncError::InvalidInput(format!("unknown account: {other}"))),
        }
    }
}
