use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profiles (
            id              TEXT PRIMARY KEY,
            full_name       TEXT,
            business_name   TEXT,
            avatar_url      TEXT,
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        -- Party A is the customer, party B the business.
        CREATE TABLE IF NOT EXISTS conversations (
            id                      TEXT PRIMARY KEY,
            party_a_id              TEXT NOT NULL,
            party_b_id              TEXT NOT NULL,
            last_message_at         TEXT,
            last_message_preview    TEXT,
            unread_count_for_a      INTEGER NOT NULL DEFAULT 0 CHECK (unread_count_for_a >= 0),
            unread_count_for_b      INTEGER NOT NULL DEFAULT 0 CHECK (unread_count_for_b >= 0),
            created_at              TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            CHECK (party_a_id <> party_b_id)
        );

        -- One conversation per unordered pair of participants.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_pair
            ON conversations(min(party_a_id, party_b_id), max(party_a_id, party_b_id));

        CREATE INDEX IF NOT EXISTS idx_conversations_party_a
            ON conversations(party_a_id, last_message_at);

        CREATE INDEX IF NOT EXISTS idx_conversations_party_b
            ON conversations(party_b_id, last_message_at);

        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender_id       TEXT NOT NULL,
            recipient_id    TEXT NOT NULL,
            body            TEXT NOT NULL CHECK (length(trim(body)) > 0),
            created_at      TEXT NOT NULL,
            read_at         TEXT,
            CHECK (sender_id <> recipient_id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_unread
            ON messages(conversation_id, recipient_id, read_at);

        CREATE TRIGGER IF NOT EXISTS trg_messages_parties
        BEFORE INSERT ON messages
        WHEN NOT EXISTS (
            SELECT 1 FROM conversations c
            WHERE c.id = NEW.conversation_id
              AND ((c.party_a_id = NEW.sender_id AND c.party_b_id = NEW.recipient_id)
                OR (c.party_b_id = NEW.sender_id AND c.party_a_id = NEW.recipient_id))
        )
        BEGIN
            SELECT RAISE(ABORT, 'sender and recipient must be the conversation parties');
        END;

        -- Keep the inbox snapshot and the recipient's unread counter current.
        CREATE TRIGGER IF NOT EXISTS trg_messages_after_insert
        AFTER INSERT ON messages
        BEGIN
            UPDATE conversations SET
                last_message_at = NEW.created_at,
                last_message_preview = substr(NEW.body, 1, 120),
                unread_count_for_a = unread_count_for_a
                    + (CASE WHEN NEW.recipient_id = party_a_id THEN 1 ELSE 0 END),
                unread_count_for_b = unread_count_for_b
                    + (CASE WHEN NEW.recipient_id = party_b_id THEN 1 ELSE 0 END)
            WHERE id = NEW.conversation_id;
        END;
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
