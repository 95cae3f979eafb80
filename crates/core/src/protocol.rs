use serde::{Deserialize, Serialize};

/// Outcome of resolving the configured asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Never checked, or checked and nothing usable was configured.
    Unresolved,
    /// A resolver run currently owns the resolution.
    Resolving,
    Found,
    /// An id was configured but the asset behind it is missing.
    NotFound,
}

impl Status {
    /// `Found` and `NotFound` are the only outcomes an observer can settle on.
    pub fn is_final(self) -> bool {
        matches!(self, Status::Found | Status::NotFound)
    }
}

/// What listeners receive on every publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub status: Status,
    pub asset_id: Option<String>,
    pub locator: Option<String>,
    pub version: u64,
    /// Set once a resolver run has checked the value against the server.
    pub verified: bool,
}

impl Snapshot {
    pub fn unresolved() -> Self {
        Self {
            status: Status::Unresolved,
            asset_id: None,
            locator: None,
            version: 0,
            verified: false,
        }
    }
}

/// An externally announced change to the asset.
///
/// A preview is applied optimistically without re-probing; a confirmed hint
/// forces a fresh resolution against the configuration endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetHint {
    #[serde(rename = "assetId", default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locator: Option<String>,
    pub confirmed: bool,
}

impl AssetHint {
    pub fn preview_locator(locator: impl Into<String>) -> Self {
        Self {
            asset_id: None,
            locator: Some(locator.into()),
            confirmed: false,
        }
    }

    pub fn preview_asset(asset_id: impl Into<String>) -> Self {
        Self {
            asset_id: Some(asset_id.into()),
            locator: None,
            confirmed: false,
        }
    }

    pub fn confirmed(asset_id: Option<String>, locator: Option<String>) -> Self {
        Self {
            asset_id,
            locator,
            confirmed: true,
        }
    }

    /// True when the hint carries neither an id nor a locator worth using.
    pub fn is_empty(&self) -> bool {
        let blank = |v: &Option<String>| v.as_deref().map_or(true, |s| s.trim().is_empty());
        blank(&self.asset_id) && blank(&self.locator)
    }
}
