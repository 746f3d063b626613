//! Mirrored mail/calendar items

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which provider surface an item came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Mail,
    Calendar,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Mail => "mail",
            ItemKind::Calendar => "calendar",
        }
    }
}

/// A locally mirrored item, identified by `(account_id, external_id)`.
///
/// The identity tuple is unique and never reused across accounts. Every
/// successful fetch of an item fully overwrites its mutable fields; items
/// are only removed when the provider's delta feed reports a deletion,
/// never because they were absent from a partial page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    /// Owning account
    pub account_id: String,
    /// Provider-assigned item identifier, unique within the account
    pub external_id: String,
    /// Mail message or calendar event
    pub kind: ItemKind,
    /// Provider labels/flags as of the last fetch
    pub labels: Vec<String>,
    /// Raw provider payload (JSON) as of the last fetch
    pub payload: String,
    /// When we last fetched this item
    pub fetched_at: DateTime<Utc>,
}

impl SyncItem {
    pub fn new(
        account_id: impl Into<String>,
        external_id: impl Into<String>,
        kind: ItemKind,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            external_id: external_id.into(),
            kind,
            labels: Vec::new(),
            payload: String::new(),
            fetched_at: Utc::now(),
        }
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = payload.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_identity_fields() {
        let item = SyncItem::new("acct-1", "msg-9", ItemKind::Mail);
        assert_eq!(item.account_id, "acct-1");
        assert_eq!(item.external_id, "msg-9");
        assert_eq!(item.kind, ItemKind::Mail);
    }

    #[test]
    fn test_item_kind_as_str() {
        assert_eq!(ItemKind::Mail.as_str(), "mail");
        assert_eq!(ItemKind::Calendar.as_str(), "calendar");
    }
}
