//! 从匹配到删号的完整流程

mod support;

use application::{ErrorKind, SendMessageRequest};
use domain::{Decision, EmailAddress, Gender, Plan, RelationshipStatus, UserId};
use support::Harness;

fn text(sender: UserId, receiver: UserId, body: String) -> SendMessageRequest {
    SendMessageRequest {
        sender_id: sender,
        receiver_id: receiver,
        body,
    }
}

#[tokio::test]
async fn request_match_fifth_message_notifies_then_withdraw_is_rejected() {
    let h = Harness::new();
    let mut khalid = h.user("khalid", Gender::Male, Plan::Freemium);
    khalid.parent_email = Some(EmailAddress::parse("khalid.parent@example.com").unwrap());
    h.save(&khalid);
    let maryam = h.sister("maryam", "maryam.wali@example.com", Plan::Freemium);

    // A -> B 发起请求
    let request = h
        .relationships
        .send_request(khalid.id, maryam.id)
        .await
        .unwrap();
    assert_eq!(request.status, RelationshipStatus::Pending);

    // B 接受
    let matched = h
        .relationships
        .respond(request.id, maryam.id, Decision::Accept)
        .await
        .unwrap();
    assert_eq!(matched.status, RelationshipStatus::Matched);

    // 前 4 条不触发通知
    for i in 1..=4 {
        h.messaging
            .send(text(khalid.id, maryam.id, format!("message number {i}")))
            .await
            .unwrap();
    }
    assert!(h.settle().await.is_empty());

    // 第 5 条触发一次通知，每位监护人各一封
    let mut stream = h.push.subscribe(maryam.id);
    h.messaging
        .send(text(khalid.id, maryam.id, "message number 5".into()))
        .await
        .unwrap();
    let event = stream.recv().await.unwrap();
    assert_eq!(event.event, "new_message");

    h.wait_for_emails(2).await;
    let emails = h.settle().await;
    assert_eq!(emails.len(), 2);
    assert_eq!(h.emails.sent_to("khalid.parent@example.com").len(), 1);
    assert_eq!(h.emails.sent_to("maryam.wali@example.com").len(), 1);

    // B 撤回已匹配的关系
    let err = h
        .relationships
        .withdraw(request.id, maryam.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
    assert_eq!(h.relationships.get_matches(khalid.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn purge_after_chatting_removes_the_match_and_thread() {
    let h = Harness::new();
    let khalid = h.user("khalid", Gender::Male, Plan::Freemium);
    let maryam = h.sister("maryam", "maryam.wali@example.com", Plan::Freemium);

    let err = h
        .messaging
        .can_send(khalid.id, maryam.id, "salam")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotMatched);

    h.matched(khalid.id, maryam.id).await;
    for i in 0..3 {
        let (from, to) = if i % 2 == 0 {
            (khalid.id, maryam.id)
        } else {
            (maryam.id, khalid.id)
        };
        h.messaging
            .send(text(from, to, format!("message number {i}")))
            .await
            .unwrap();
    }
    let thread = h.messaging.get_thread(khalid.id, maryam.id).await.unwrap();
    assert_eq!(thread.len(), 3);

    h.purge.purge_account(khalid.id).await.unwrap();

    assert!(h.relationships.get_matches(maryam.id).await.unwrap().is_empty());
    let err = h
        .messaging
        .get_thread(maryam.id, khalid.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotMatched);
    assert_eq!(h.store.snapshot().unwrap().count_references(khalid.id), 0);
}
