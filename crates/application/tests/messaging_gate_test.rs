//! 消息闸门集成测试

mod support;

use std::sync::Arc;

use application::{
    ApplicationError, ChatMessageRepository, ErrorKind, PlanLimitKind, SendMessageRequest,
    VideoCallRequest,
};
use chrono::Utc;
use domain::{
    CallEvent, CallMeta, ChatMessageStatus, ChatMessageType, Gender, GuardianRecord, Plan,
    UserId, WaliDetails,
};
use support::Harness;

fn text(sender: UserId, receiver: UserId, body: &str) -> SendMessageRequest {
    SendMessageRequest {
        sender_id: sender,
        receiver_id: receiver,
        body: body.to_string(),
    }
}

fn words(n: usize) -> String {
    vec!["salam"; n].join(" ")
}

#[tokio::test]
async fn unmatched_pair_cannot_message() {
    let h = Harness::new();
    let a = h.user("a", Gender::Male, Plan::Freemium);
    let b = h.user("b", Gender::Female, Plan::Freemium);
    h.relationships.send_request(a.id, b.id).await.unwrap();

    let err = h.messaging.can_send(a.id, b.id, "hello").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotMatched);
}

#[tokio::test]
async fn empty_body_is_a_validation_error() {
    let h = Harness::new();
    let a = h.user("a", Gender::Male, Plan::Freemium);
    let b = h.sister("b", "wali.b@example.com", Plan::Freemium);
    h.matched(a.id, b.id).await;

    let err = h.messaging.can_send(a.id, b.id, "   ").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn allowance_blocks_the_eleventh_message() {
    let h = Harness::new();
    let a = h.user("a", Gender::Male, Plan::Freemium);
    let b = h.sister("b", "wali.b@example.com", Plan::Freemium);
    h.matched(a.id, b.id).await;

    for i in 0..10 {
        h.messaging
            .send(text(a.id, b.id, &format!("message {i}")))
            .await
            .unwrap();
    }

    let err = h
        .messaging
        .send(text(a.id, b.id, "one more"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApplicationError::PlanExceeded(PlanLimitKind::Allowance {
            sent: 10,
            allowance: 10
        })
    ));

    // 额度按方向统计
    h.messaging.can_send(b.id, a.id, "reply").await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sends_never_exceed_the_allowance() {
    let h = Arc::new(Harness::new());
    let a = h.user("a", Gender::Male, Plan::Freemium);
    let b = h.sister("b", "wali.b@example.com", Plan::Freemium);
    h.matched(a.id, b.id).await;

    let (from, to) = (a.id, b.id);
    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let h = h.clone();
            tokio::spawn(async move {
                h.messaging
                    .send(text(from, to, &format!("message {i}")))
                    .await
            })
        })
        .collect();

    let mut delivered = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => delivered += 1,
            Err(err) => assert_eq!(err.kind(), ErrorKind::PlanExceeded),
        }
    }
    assert_eq!(delivered, 10);
    assert_eq!(h.store.count_sent(a.id, b.id).await.unwrap(), 10);
}

#[tokio::test]
async fn word_limit_boundary_is_inclusive() {
    let h = Harness::new();
    let a = h.user("a", Gender::Male, Plan::Freemium);
    let b = h.sister("b", "wali.b@example.com", Plan::Freemium);
    h.matched(a.id, b.id).await;

    let permit = h.messaging.can_send(a.id, b.id, &words(19)).await.unwrap();
    assert_eq!(permit.words, 19);

    let err = h
        .messaging
        .can_send(a.id, b.id, &words(20))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PlanExceeded);
}

#[tokio::test]
async fn female_sender_guardian_states_are_distinguished() {
    let h = Harness::new();
    let brother = h.user("brother", Gender::Male, Plan::Premium);
    let mut sister = h.user("sister", Gender::Female, Plan::Premium);
    h.matched(brother.id, sister.id).await;

    let err = h
        .messaging
        .can_send(sister.id, brother.id, "hello")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WaliRequired);

    sister.wali = GuardianRecord::Provided(WaliDetails {
        name: Some("Yusuf".into()),
        phone: Some("+441234".into()),
        ..WaliDetails::default()
    });
    h.save(&sister);
    let err = h
        .messaging
        .can_send(sister.id, brother.id, "hello")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::WaliEmailRequired);

    sister.wali = GuardianRecord::from_stored(Some("{not json"));
    h.save(&sister);
    let err = h
        .messaging
        .can_send(sister.id, brother.id, "hello")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedWaliJson);

    sister.wali = GuardianRecord::from_stored(Some(r#"{"email":"yusuf@example.com"}"#));
    h.save(&sister);
    h.messaging
        .can_send(sister.id, brother.id, "hello")
        .await
        .unwrap();
}

#[tokio::test]
async fn thread_is_ordered_and_annotated() {
    let h = Harness::new();
    let mut a = h.user("a", Gender::Male, Plan::Freemium);
    a.display_name = Some("Abdullah".into());
    h.save(&a);
    let b = h.sister("b", "wali.b@example.com", Plan::Freemium);
    h.matched(a.id, b.id).await;

    h.messaging.send(text(a.id, b.id, "first")).await.unwrap();
    h.messaging.send(text(b.id, a.id, "second")).await.unwrap();
    h.messaging.send(text(a.id, b.id, "third")).await.unwrap();

    let thread = h.messaging.get_thread(b.id, a.id).await.unwrap();
    let bodies: Vec<&str> = thread.iter().map(|e| e.message.body.as_str()).collect();
    assert_eq!(bodies, ["first", "second", "third"]);
    assert_eq!(thread[0].sender_name, "Abdullah");
    assert_eq!(thread[1].sender_name, "b");
}

#[tokio::test]
async fn mark_read_ignores_messages_sent_by_the_reader() {
    let h = Harness::new();
    let a = h.user("a", Gender::Male, Plan::Freemium);
    let b = h.sister("b", "wali.b@example.com", Plan::Freemium);
    h.matched(a.id, b.id).await;

    let to_b = h.messaging.send(text(a.id, b.id, "hi")).await.unwrap();
    let to_a = h.messaging.send(text(b.id, a.id, "hello")).await.unwrap();

    let changed = h.messaging.mark_read(b.id, &[to_b.id, to_a.id]).await.unwrap();
    assert_eq!(changed, 1);
    assert_eq!(h.messaging.mark_read(b.id, &[]).await.unwrap(), 0);

    let thread = h.messaging.get_thread(a.id, b.id).await.unwrap();
    assert_eq!(thread[0].message.status, ChatMessageStatus::Read);
    assert_eq!(thread[1].message.status, ChatMessageStatus::Unread);
}

#[tokio::test]
async fn invitation_reaching_a_milestone_notifies_guardians() {
    let h = Harness::new();
    let caller = h.user("caller", Gender::Male, Plan::Premium);
    let sister = h.sister("sister", "wali.s@example.com", Plan::Premium);
    h.matched(caller.id, sister.id).await;

    for i in 0..4 {
        h.messaging
            .send(text(caller.id, sister.id, &format!("message {i}")))
            .await
            .unwrap();
    }
    assert!(h.settle().await.is_empty());

    h.messaging
        .invite_video_call(VideoCallRequest {
            caller_id: caller.id,
            recipient_id: sister.id,
            meta: CallMeta {
                call_id: "call-5".into(),
                event: CallEvent::Started,
                at: Utc::now(),
                duration_secs: None,
            },
        })
        .await
        .unwrap();

    h.wait_for_emails(2).await;
    let sent = h.emails.sent_to("wali.s@example.com");
    assert_eq!(sent.len(), 2);
    assert!(sent
        .iter()
        .any(|email| email.subject.starts_with("Conversation update")));
    assert!(sent
        .iter()
        .any(|email| email.subject.starts_with("Video call started")));
}

#[tokio::test]
async fn video_call_requires_an_eligible_plan() {
    let h = Harness::new();
    let free = h.user("free", Gender::Male, Plan::Freemium);
    let paid = h.user("paid", Gender::Male, Plan::Premium);
    let sister = h.sister("sister", "wali.s@example.com", Plan::Premium);
    h.matched(free.id, sister.id).await;
    h.matched(paid.id, sister.id).await;

    let meta = CallMeta {
        call_id: "call-1".into(),
        event: CallEvent::Started,
        at: Utc::now(),
        duration_secs: None,
    };

    let err = h
        .messaging
        .invite_video_call(VideoCallRequest {
            caller_id: free.id,
            recipient_id: sister.id,
            meta: meta.clone(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PlanExceeded);

    let invitation = h
        .messaging
        .invite_video_call(VideoCallRequest {
            caller_id: paid.id,
            recipient_id: sister.id,
            meta,
        })
        .await
        .unwrap();
    assert_eq!(invitation.message_type, ChatMessageType::VideoCallInvitation);

    let emails = h.wait_for_emails(1).await;
    assert_eq!(h.emails.sent_to("wali.s@example.com").len(), 1);
    assert!(emails[0].subject.starts_with("Video call started"));
}
