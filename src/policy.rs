//! Action Categories and Policies
//!
//! Static quota table for the rate limiter. Each known category carries a
//! fixed cap and sliding-window length. Unknown category names fall open
//! (always permitted) so a ledger written by a newer client never blocks
//! an older build; that default lives here, in one place, rather than
//! being re-decided at each call site.

use serde::{Deserialize, Serialize};

/// One hour in milliseconds.
pub const HOUR_MS: i64 = 3_600_000;

/// Twenty-four hours in milliseconds.
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// Daily storage cap in bytes (20 MB).
pub const STORAGE_CAP_BYTES: u64 = 20_000_000;

/// Categories of actions the limiter accounts for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionCategory {
    /// Chat messages (per hour)
    #[serde(rename = "messages")]
    Messages,
    /// File attachments (per day)
    #[serde(rename = "attachments")]
    Attachments,
    /// Outbound emails (per day)
    #[serde(rename = "emails")]
    Emails,
    /// Web searches (per day)
    #[serde(rename = "searches")]
    Searches,
    /// Aggregate messages across features (per day)
    #[serde(rename = "totalMessages")]
    TotalMessages,
    /// Aggregate upload bytes (per day)
    #[serde(rename = "totalStorage")]
    TotalStorage,
}

/// Cap and window for one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Maximum permitted units inside the window: events, or bytes for
    /// byte-denominated categories.
    pub max_units: u64,

    /// Sliding-window length in milliseconds.
    pub window_ms: i64,
}

impl ActionCategory {
    /// All categories the policy table knows about.
    pub const ALL: [ActionCategory; 6] = [
        ActionCategory::Messages,
        ActionCategory::Attachments,
        ActionCategory::Emails,
        ActionCategory::Searches,
        ActionCategory::TotalMessages,
        ActionCategory::TotalStorage,
    ];

    /// Get the policy for this category
    pub fn policy(&self) -> Policy {
        match self {
            ActionCategory::Messages => Policy {
                max_units: 50,
                window_ms: HOUR_MS,
            },
            ActionCategory::Attachments => Policy {
                max_units: 10,
                window_ms: DAY_MS,
            },
            ActionCategory::Emails => Policy {
                max_units: 2,
                window_ms: DAY_MS,
            },
            ActionCategory::Searches => Policy {
                max_units: 20,
                window_ms: DAY_MS,
            },
            ActionCategory::TotalMessages => Policy {
                max_units: 200,
                window_ms: DAY_MS,
            },
            ActionCategory::TotalStorage => Policy {
                max_units: STORAGE_CAP_BYTES,
                window_ms: DAY_MS,
            },
        }
    }

    /// Whether this category is accounted in bytes rather than events
    pub fn counts_bytes(&self) -> bool {
        matches!(self, ActionCategory::TotalStorage)
    }

    /// Wire name of the category as it appears in the persisted ledger
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionCategory::Messages => "messages",
            ActionCategory::Attachments => "attachments",
            ActionCategory::Emails => "emails",
            ActionCategory::Searches => "searches",
            ActionCategory::TotalMessages => "totalMessages",
            ActionCategory::TotalStorage => "totalStorage",
        }
    }

    /// Look a category up by wire name; `None` for names outside the table
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "messages" => Some(ActionCategory::Messages),
            "attachments" => Some(ActionCategory::Attachments),
            "emails" => Some(ActionCategory::Emails),
            "searches" => Some(ActionCategory::Searches),
            "totalMessages" => Some(ActionCategory::TotalMessages),
            "totalStorage" => Some(ActionCategory::TotalStorage),
            _ => None,
        }
    }
}

/// Policy for a category name, `None` when no limit applies.
pub fn policy_for(name: &str) -> Option<Policy> {
    ActionCategory::from_name(name).map(|c| c.policy())
}
