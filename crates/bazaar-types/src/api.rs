use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Role;

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub conversation_id: Uuid,
    pub recipient_id: Uuid,
    pub body: String,
}

// -- Procedures --

pub const GET_OR_CREATE_CONVERSATION: &str = "get_or_create_conversation";
pub const MARK_CONVERSATION_READ: &str = "mark_conversation_read";
pub const UNREAD_TOTAL: &str = "unread_total";

/// Arguments for `get_or_create_conversation`. Party A is the customer,
/// party B the business.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetOrCreateConversationArgs {
    pub party_a: Uuid,
    pub party_b: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkConversationReadArgs {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnreadTotalArgs {
    pub role: Role,
    pub account_id: Uuid,
}
