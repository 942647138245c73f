use serde::{Deserialize, Serialize};
use url::Url;

use crate::engine::cookies::cookies::CookieListItem;
use crate::engine::cookies::observer::ObserverId;

/// Whether a cookie became visible to, or hidden from, script at a url.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Visible,
    Hidden,
}

/// One cookie transitioning at one scope url.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieChange {
    pub change_type: ChangeType,
    pub name: String,
    /// New value for `Visible`, last known value for `Hidden`.
    pub value: String,
    pub url: Url,
    /// Every script-visible cookie at `url` after the change, in read order.
    pub all: Vec<CookieListItem>,
}

/// Changes delivered to an observer in one callback invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieChangeBatch {
    pub observer: ObserverId,
    /// `true` for the snapshot delivered after the first `observe`.
    pub initial: bool,
    pub changes: Vec<CookieChange>,
}

impl CookieChangeBatch {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn visible(&self) -> impl Iterator<Item = &CookieChange> {
        self.changes.iter().filter(|c| c.change_type == ChangeType::Visible)
    }

    pub fn hidden(&self) -> impl Iterator<Item = &CookieChange> {
        self.changes.iter().filter(|c| c.change_type == ChangeType::Hidden)
    }
}
