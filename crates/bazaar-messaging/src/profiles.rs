use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use bazaar_types::models::Profile;
use uuid::Uuid;

use crate::backend::{Backend, Filter, Query, Table, decode_rows};
use crate::error::MessagingError;
use crate::lifecycle::timed;

/// Resolves display profiles for many accounts in one query.
#[derive(Clone)]
pub struct ProfileLookup {
    backend: Arc<dyn Backend>,
    timeout: Duration,
}

impl ProfileLookup {
    pub fn new(backend: Arc<dyn Backend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Map each known id to its profile. Unknown ids are simply absent.
    pub async fn lookup(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, Profile>, MessagingError> {
        let unique: BTreeSet<Uuid> = ids.iter().copied().collect();
        if unique.is_empty() {
            return Ok(HashMap::new());
        }

        let query = Query::from(Table::Profiles).filter(Filter::is_in("id", &unique));
        let rows = timed(self.timeout, self.backend.query(query)).await?;
        let profiles: Vec<Profile> = decode_rows("profile", rows)?;

        Ok(profiles.into_iter().map(|p| (p.id, p)).collect())
    }
}
