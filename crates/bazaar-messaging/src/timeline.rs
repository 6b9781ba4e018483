use std::collections::HashSet;

use bazaar_types::models::Message;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// The in-memory message list of one open thread.
///
/// Always sorted by `created_at` ascending and holds each message id at most
/// once, whichever source (page fetch, realtime, own send) delivered it
/// first. Later copies of a known id are dropped unchanged.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    messages: Vec<Message>,
    ids: HashSet<Uuid>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Cursor for the next "load older" request.
    pub fn oldest_timestamp(&self) -> Option<DateTime<Utc>> {
        self.messages.first().map(|m| m.created_at)
    }

    /// Insert one message in order. Returns `false` if its id was already
    /// present.
    pub fn merge(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }
        // Ties keep arrival order
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
        true
    }

    /// Merge a batch (a fetched page, usually older than everything held).
    /// Returns how many messages were new.
    pub fn merge_all(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        messages
            .into_iter()
            .map(|m| self.merge(m))
            .filter(|added| *added)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(second: u32) -> Message {
        Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::nil(),
            sender_id: Uuid::new_v4(),
            recipient_id: Uuid::new_v4(),
            body: format!("at {}", second),
            created_at: Utc.with_ymd_and_hms(2026, 5, 1, 12, 0, second).unwrap(),
            read_at: None,
        }
    }

    #[test]
    fn any_interleaving_yields_each_id_once_in_order() {
        let msgs: Vec<Message> = (0..6).map(message).collect();

        let mut fetched_first = Timeline::new();
        fetched_first.merge_all(msgs[2..].iter().cloned());
        fetched_first.merge(msgs[5].clone());
        fetched_first.merge(msgs[4].clone());
        fetched_first.merge_all(msgs[..3].iter().cloned());

        let mut live_first = Timeline::new();
        live_first.merge(msgs[5].clone());
        live_first.merge(msgs[5].clone());
        live_first.merge_all(msgs.iter().rev().cloned());

        for timeline in [&fetched_first, &live_first] {
            let ids: Vec<Uuid> = timeline.messages().iter().map(|m| m.id).collect();
            assert_eq!(ids, msgs.iter().map(|m| m.id).collect::<Vec<_>>());
        }
    }

    #[test]
    fn duplicate_id_leaves_length_unchanged() {
        let mut timeline = Timeline::new();
        let original = message(1);
        assert!(timeline.merge(original.clone()));

        let mut echo = original.clone();
        echo.body = "edited copy".into();
        assert!(!timeline.merge(echo));

        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline.messages()[0].body, original.body);
    }

    #[test]
    fn oldest_timestamp_tracks_front() {
        let mut timeline = Timeline::new();
        assert_eq!(timeline.oldest_timestamp(), None);

        timeline.merge(message(30));
        timeline.merge(message(10));
        assert_eq!(timeline.oldest_timestamp(), Some(message(10).created_at));
    }
}
