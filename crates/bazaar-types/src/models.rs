use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The two account roles in the marketplace.
///
/// A conversation always pairs one customer (party A) with one business
/// (party B), so the role decides which party columns belong to an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Business,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Business => "business",
        }
    }

    /// Column holding this role's participant id.
    pub fn party_column(self) -> &'static str {
        match self {
            Self::Customer => "party_a_id",
            Self::Business => "party_b_id",
        }
    }

    /// Column holding this role's unread counter.
    pub fn unread_column(self) -> &'static str {
        match self {
            Self::Customer => "unread_count_for_a",
            Self::Business => "unread_count_for_b",
        }
    }

    pub fn counterpart(self) -> Self {
        match self {
            Self::Customer => Self::Business,
            Self::Business => Self::Customer,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role `{0}` (expected `customer` or `business`)")]
pub struct ParseRoleError(String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(Self::Customer),
            "business" => Ok(Self::Business),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub party_a_id: Uuid,
    pub party_b_id: Uuid,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_preview: Option<String>,
    pub unread_count_for_a: u32,
    pub unread_count_for_b: u32,
}

impl Conversation {
    pub fn party_id(&self, role: Role) -> Uuid {
        match role {
            Role::Customer => self.party_a_id,
            Role::Business => self.party_b_id,
        }
    }

    /// The other participant from `role`'s point of view.
    pub fn counterpart_id(&self, role: Role) -> Uuid {
        self.party_id(role.counterpart())
    }

    pub fn unread_for(&self, role: Role) -> u32 {
        match role {
            Role::Customer => self.unread_count_for_a,
            Role::Business => self.unread_count_for_b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub full_name: Option<String>,
    pub business_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl Profile {
    /// Business accounts are shown by trading name, customers by full name.
    pub fn display_name(&self) -> &str {
        self.business_name
            .as_deref()
            .or(self.full_name.as_deref())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or("Unknown")
    }
}

/// Counterpart details shown next to a conversation in the inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counterpart {
    pub id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl Counterpart {
    pub fn from_profile(id: Uuid, profile: Option<&Profile>) -> Self {
        match profile {
            Some(p) => Self {
                id,
                display_name: p.display_name().to_string(),
                avatar_url: p.avatar_url.clone(),
            },
            None => Self {
                id,
                display_name: "Unknown".to_string(),
                avatar_url: None,
            },
        }
    }
}

/// One inbox row: the conversation, who it is with, and the viewer's
/// unread count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub counterpart: Counterpart,
    pub unread_count: u32,
}
