mod common;

use std::collections::HashSet;
use std::time::Duration;

use bazaar_messaging::MessagingError;
use bazaar_types::api::{GET_OR_CREATE_CONVERSATION, UNREAD_TOTAL};
use bazaar_types::models::Role;
use common::Harness;
use futures_util::future::join_all;
use uuid::Uuid;

#[tokio::test]
async fn inbox_is_decorated_with_one_profile_lookup() {
    let h = Harness::new();
    let regular = Uuid::new_v4();
    let anonymous = Uuid::new_v4();
    h.profile(regular, Some("Lee Park"), None);

    let mut threads = Vec::new();
    for (customer, sent) in [(anonymous, 1), (h.customer, 2), (regular, 3)] {
        let id = h
            .client(customer)
            .directory()
            .open_conversation(customer, h.bakery)
            .await
            .unwrap();
        let conversation = h.reload(id);
        h.seed(&conversation, customer, sent);
        threads.push(conversation);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let before = h.backend.profile_queries();
    let inbox = h.client(h.bakery).directory().list(h.bakery, Role::Business).await.unwrap();
    assert_eq!(h.backend.profile_queries(), before + 1);

    let names: Vec<&str> = inbox.iter().map(|s| s.counterpart.display_name.as_str()).collect();
    assert_eq!(names, vec!["Lee Park", "Dana Reyes", "Unknown"]);
    let unread: Vec<u32> = inbox.iter().map(|s| s.unread_count).collect();
    assert_eq!(unread, vec![3, 2, 1]);
    assert_eq!(inbox[0].conversation.id, threads[2].id);
    assert_eq!(inbox[0].conversation.last_message_preview.as_deref(), Some("seed 2"));
}

#[tokio::test]
async fn customer_sees_business_names() {
    let h = Harness::new();
    let bakery = h.conversation(h.bakery).await;
    h.conversation(h.florist).await;
    h.seed(&bakery, h.bakery, 2);

    let inbox = h
        .client(h.customer)
        .directory()
        .list(h.customer, Role::Customer)
        .await
        .unwrap();

    assert_eq!(inbox.len(), 2);
    assert_eq!(inbox[0].counterpart.display_name, "Corner Bakery");
    assert_eq!(inbox[0].unread_count, 2);
    assert_eq!(inbox[1].counterpart.display_name, "Petal & Stem");
    assert_eq!(inbox[1].unread_count, 0);
}

#[tokio::test]
async fn empty_inbox_skips_profile_lookup() {
    let h = Harness::new();
    let inbox = h
        .client(h.florist)
        .directory()
        .list(h.florist, Role::Business)
        .await
        .unwrap();

    assert!(inbox.is_empty());
    assert_eq!(h.backend.profile_queries(), 0);
}

#[tokio::test]
async fn failed_inbox_load_can_be_retried() {
    let h = Harness::new();
    h.conversation(h.bakery).await;
    let directory = h.client(h.customer).directory();

    h.backend.fail_conversation_queries(1);
    let err = directory.list(h.customer, Role::Customer).await.unwrap_err();
    assert!(matches!(err, MessagingError::ServerError(_)));
    assert!(err.is_retryable());
    assert_eq!(h.backend.profile_queries(), 0);

    let inbox = directory.list(h.customer, Role::Customer).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].counterpart.display_name, "Corner Bakery");
}

async fn seed_unread(h: &Harness) {
    let bakery = h.conversation(h.bakery).await;
    let florist = h.conversation(h.florist).await;
    h.seed(&bakery, h.bakery, 3);
    h.seed(&florist, h.florist, 4);
    h.seed(&florist, h.customer, 1);
}

#[tokio::test]
async fn unread_total_sums_every_conversation() {
    let h = Harness::new();
    seed_unread(&h).await;

    let directory = h.client(h.customer).directory();
    assert_eq!(directory.unread_total(h.customer, Role::Customer).await, Ok(7));
    assert_eq!(directory.unread_total(h.florist, Role::Business).await, Ok(1));
}

#[tokio::test]
async fn unread_total_falls_back_to_summing_counters() {
    let h = Harness::without_procedures(&[UNREAD_TOTAL]);
    seed_unread(&h).await;

    let directory = h.client(h.customer).directory();
    assert_eq!(directory.unread_total(h.customer, Role::Customer).await, Ok(7));
    assert_eq!(directory.unread_total(h.bakery, Role::Business).await, Ok(0));
}

async fn racing_opens_agree(h: &Harness) {
    let directory = h.client(h.customer).directory();
    let ids: Vec<Uuid> = join_all((0..8).map(|_| directory.open_conversation(h.customer, h.bakery)))
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    let distinct: HashSet<Uuid> = ids.iter().copied().collect();
    assert_eq!(distinct.len(), 1);

    let found = directory.find_conversation(h.bakery, h.customer).await.unwrap().unwrap();
    assert_eq!(found.id, ids[0]);
    assert_eq!(found.party_a_id, h.customer);
    assert_eq!(found.party_b_id, h.bakery);
}

#[tokio::test]
async fn racing_opens_share_one_conversation() {
    racing_opens_agree(&Harness::new()).await;
}

#[tokio::test]
async fn racing_opens_share_one_conversation_without_procedure() {
    racing_opens_agree(&Harness::without_procedures(&[GET_OR_CREATE_CONVERSATION])).await;
}

#[tokio::test]
async fn conversation_with_oneself_is_rejected() {
    let h = Harness::new();
    let result = h
        .client(h.customer)
        .directory()
        .open_conversation(h.customer, h.customer)
        .await;
    assert!(matches!(result, Err(MessagingError::InvalidInput(_))));
}
