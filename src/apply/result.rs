use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// What kind of change converging an object performed.
///
/// The lowercase tokens are stable; they are what callers print and match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyResult {
    /// The object did not exist and was created.
    Created,
    /// The object existed and a change was written.
    Configured,
    /// The object already matched; nothing was written.
    Unchanged,
    /// Not exactly one outcome was observed, so none can be reported.
    Unknown,
}

impl ApplyResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyResult::Created => "created",
            ApplyResult::Configured => "configured",
            ApplyResult::Unchanged => "unchanged",
            ApplyResult::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ApplyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApplyResult {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(ApplyResult::Created),
            "configured" => Ok(ApplyResult::Configured),
            "unchanged" => Ok(ApplyResult::Unchanged),
            "unknown" => Ok(ApplyResult::Unknown),
            other => Err(AppError::Decode(format!("unknown apply result {other:?}"))),
        }
    }
}
