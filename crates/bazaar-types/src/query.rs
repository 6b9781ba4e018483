use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tables exposed by the data service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Profiles,
    Conversations,
    Messages,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Profiles => "profiles",
            Self::Conversations => "conversations",
            Self::Messages => "messages",
        }
    }

    /// Columns a client may filter, order or write on.
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Self::Profiles => &["id", "full_name", "business_name", "avatar_url", "created_at"],
            Self::Conversations => &[
                "id",
                "party_a_id",
                "party_b_id",
                "last_message_at",
                "last_message_preview",
                "unread_count_for_a",
                "unread_count_for_b",
                "created_at",
            ],
            Self::Messages => &[
                "id",
                "conversation_id",
                "sender_id",
                "recipient_id",
                "body",
                "created_at",
                "read_at",
            ],
        }
    }

    pub fn has_column(self, column: &str) -> bool {
        self.columns().contains(&column)
    }
}

/// A single row predicate. Filters in a list are AND-ed together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    Eq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    Lt { column: String, value: Value },
    IsNull { column: String },
}

impl Filter {
    pub fn eq(column: &str, value: impl Serialize) -> Self {
        Self::Eq {
            column: column.to_string(),
            value: to_value(value),
        }
    }

    pub fn is_in<T: Serialize>(column: &str, values: impl IntoIterator<Item = T>) -> Self {
        Self::In {
            column: column.to_string(),
            values: values.into_iter().map(to_value).collect(),
        }
    }

    pub fn lt(column: &str, value: impl Serialize) -> Self {
        Self::Lt {
            column: column.to_string(),
            value: to_value(value),
        }
    }

    pub fn is_null(column: &str) -> Self {
        Self::IsNull {
            column: column.to_string(),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Self::Eq { column, .. }
            | Self::In { column, .. }
            | Self::Lt { column, .. }
            | Self::IsNull { column } => column,
        }
    }

    /// Evaluate the predicate against a decoded row. Used for server-side
    /// realtime filtering, where rows are already JSON.
    pub fn matches(&self, row: &Map<String, Value>) -> bool {
        let cell = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Self::Eq { value, .. } => cell == value,
            Self::In { values, .. } => values.contains(cell),
            Self::Lt { value, .. } => match (cell, value) {
                (Value::String(a), Value::String(b)) => a < b,
                (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
                    (Some(a), Some(b)) => a < b,
                    _ => false,
                },
                _ => false,
            },
            Self::IsNull { .. } => cell.is_null(),
        }
    }
}

fn to_value(value: impl Serialize) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub table: Table,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<u32>,
}

impl Query {
    pub fn from(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_desc(mut self, column: &str) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            descending: true,
        });
        self
    }

    pub fn order_asc(mut self, column: &str) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            descending: false,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    Insert {
        table: Table,
        row: Map<String, Value>,
    },
    Update {
        table: Table,
        filters: Vec<Filter>,
        set: Map<String, Value>,
    },
    /// Insert, silently skipping a row that collides with a unique
    /// constraint. Returns no row when the insert was skipped.
    Upsert {
        table: Table,
        row: Map<String, Value>,
    },
}

impl Mutation {
    pub fn table(&self) -> Table {
        match self {
            Self::Insert { table, .. } | Self::Update { table, .. } | Self::Upsert { table, .. } => {
                *table
            }
        }
    }
}
