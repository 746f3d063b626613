//! Account model representing a connected provider account

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A provider account registered for mirroring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Provider-assigned account identifier (unique)
    pub id: String,
    /// Email address of the account
    pub email: String,
    /// Display name (can be customized by user)
    pub display_name: Option<String>,
    /// When the account was connected
    pub connected_at: DateTime<Utc>,
}

impl Account {
    /// Register a new account
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            display_name: None,
            connected_at: Utc::now(),
        }
    }

    /// Set display name
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_new() {
        let account = Account::new("acct-1", "test@example.com");
        assert_eq!(account.id, "acct-1");
        assert_eq!(account.email, "test@example.com");
        assert!(account.display_name.is_none());
    }

    #[test]
    fn test_account_with_display_name() {
        let account = Account::new("acct-1", "test@example.com").with_display_name("Test");
        assert_eq!(account.display_name.as_deref(), Some("Test"));
    }
}
