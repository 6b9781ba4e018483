/// Rows leave the database as JSON objects keyed by column name, the same
/// shape the hosted service returns. Typed decoding happens in the caller.
pub type JsonRow = serde_json::Map<String, serde_json::Value>;

/// Profile data written by account management. Messaging only reads it.
pub struct NewProfile<'a> {
    pub id: &'a str,
    pub full_name: Option<&'a str>,
    pub business_name: Option<&'a str>,
    pub avatar_url: Option<&'a str>,
}
