use super::*;
use crate::events::{Delivery, Participant};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FixedApi {
    recipient_id: String,
    message_id: String,
}

#[async_trait]
impl MessageApi for FixedApi {
    async fn send_message(
        &self,
        _recipient: &Recipient,
        _message: &OutgoingMessage,
    ) -> Result<SendReceipt, RelayError> {
        Ok(SendReceipt {
            recipient_id: self.recipient_id.clone(),
            message_id: self.message_id.clone(),
        })
    }
}

fn fixed(recipient_id: &str, message_id: &str) -> Arc<dyn MessageApi> {
    Arc::new(FixedApi {
        recipient_id: recipient_id.into(),
        message_id: message_id.into(),
    })
}

#[test]
fn test_recipient_serialization() {
    assert_eq!(
        serde_json::to_value(Recipient::Id("123".into())).unwrap(),
        serde_json::json!({"id": "123"})
    );
    assert_eq!(
        serde_json::to_value(Recipient::UserRef("ref".into())).unwrap(),
        serde_json::json!({"user_ref": "ref"})
    );
}

#[tokio::test]
async fn test_graph_client_posts_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/me/messages"))
        .and(query_param("access_token", "TOKEN"))
        .and(body_json(serde_json::json!({
            "recipient": {"id": "U1"},
            "message": {"text": "hi"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "recipient_id": "U1",
            "message_id": "mid.out.1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = GraphClient::new(&server.uri(), "TOKEN");
    let receipt = client
        .send_message(
            &Recipient::Id("U1".into()),
            &OutgoingMessage::Text("hi".into()),
        )
        .await
        .unwrap();
    assert_eq!(receipt.message_id, "mid.out.1");
    assert_eq!(receipt.recipient_id, "U1");
}

#[tokio::test]
async fn test_graph_client_maps_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/me/messages"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad recipient"))
        .mount(&server)
        .await;

    let client = GraphClient::new(&server.uri(), "TOKEN");
    let err = client
        .send_message(
            &Recipient::Id("nobody".into()),
            &OutgoingMessage::Payload(serde_json::json!({"attachment": {}})),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Platform { status: 400, .. }));
}

#[tokio::test]
async fn test_send_without_wait_registers_nothing() {
    let pending = Arc::new(PendingAckTable::new());
    let outgoing = Outgoing::new(fixed("U1", "X1"), pending.clone());

    let sent = outgoing
        .send(
            &Recipient::Id("U1".into()),
            &OutgoingMessage::Text("hello".into()),
            WaitFor::default(),
        )
        .await
        .unwrap();
    assert_eq!(sent.message_id, "X1");
    assert!(sent.confirmation.is_none());
    assert!(pending.is_empty());
}

#[tokio::test]
async fn test_send_with_wait_registers_and_confirms() {
    let pending = Arc::new(PendingAckTable::new());
    let outgoing = Outgoing::new(fixed("U1", "X1"), pending.clone());

    let sent = outgoing
        .send(
            &Recipient::Id("U1".into()),
            &OutgoingMessage::Text("hello".into()),
            WaitFor::DELIVERY,
        )
        .await
        .unwrap();
    assert!(pending.contains("U1", "X1"));

    let event = MessagingEvent {
        sender: Some(Participant { id: "U1".into() }),
        delivery: Some(Delivery {
            mids: vec!["X1".into()],
            watermark: 10,
        }),
        ..Default::default()
    };
    pending.resolve_delivery("U1", &["X1".to_string()], &event);

    let outcome = sent
        .confirmation
        .unwrap()
        .wait(Duration::from_secs(1))
        .await;
    assert_eq!(outcome, ConfirmationOutcome::Confirmed(Box::new(event)));
}

#[tokio::test]
async fn test_user_ref_send_tracks_resolved_recipient() {
    let pending = Arc::new(PendingAckTable::new());
    let outgoing = Outgoing::new(fixed("PSID-9", "X9"), pending.clone());

    outgoing
        .send(
            &Recipient::UserRef("UREF".into()),
            &OutgoingMessage::Text("welcome".into()),
            WaitFor::READ,
        )
        .await
        .unwrap();
    assert!(pending.contains("PSID-9", "X9"));
    assert!(!pending.contains("UREF", "X9"));
}

#[tokio::test]
async fn test_duplicate_platform_id_surfaces_error() {
    let pending = Arc::new(PendingAckTable::new());
    let outgoing = Outgoing::new(fixed("U1", "SAME"), pending.clone());
    let recipient = Recipient::Id("U1".into());
    let message = OutgoingMessage::Text("x".into());

    outgoing
        .send(&recipient, &message, WaitFor::DELIVERY)
        .await
        .unwrap();
    let err = outgoing
        .send(&recipient, &message, WaitFor::DELIVERY)
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::DuplicateKey { .. }));
}

#[tokio::test]
async fn test_confirmation_timeout_and_abandon() {
    let (_tx, rx) = oneshot::channel::<MessagingEvent>();
    let outcome = Confirmation(rx).wait(Duration::from_millis(10)).await;
    assert_eq!(outcome, ConfirmationOutcome::TimedOut);

    let (tx, rx) = oneshot::channel::<MessagingEvent>();
    drop(tx);
    let outcome = Confirmation(rx).wait(Duration::from_secs(1)).await;
    assert_eq!(outcome, ConfirmationOutcome::Abandoned);
}

#[tokio::test]
async fn test_send_text_returns_message_id() {
    let pending = Arc::new(PendingAckTable::new());
    let outgoing = Outgoing::new(fixed("U1", "T1"), pending.clone());
    let mid = outgoing
        .send_text(&Recipient::Id("U1".into()), "ack")
        .await
        .unwrap();
    assert_eq!(mid, "T1");
    assert!(pending.is_empty());
}
