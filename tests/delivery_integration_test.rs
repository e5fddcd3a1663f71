//! Integration tests for push delivery against a mock push service.
//!
//! Each test stands up a wiremock server playing the push service and checks
//! both what goes over the wire and what the store looks like afterwards.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine};
use p256::ecdsa::VerifyingKey;
use p256::elliptic_curve::rand_core::OsRng;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::SecretKey;
use webpush_delivery::notifications::{ece, vapid};
use webpush_delivery::{
    BatchReport, DeliveryOptions, DeliveryOutcome, DeliveryReport, MemorySubscriptionStore,
    NotificationPayload, PushDispatcher, PushError, SigningIdentity, Subscription,
    SubscriptionKeys, SubscriptionStore,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Nothing listens on port 1, so connecting fails fast.
const UNREACHABLE_ENDPOINT: &str = "http://127.0.0.1:1/push/c";

struct Subscriber {
    secret: SecretKey,
    auth: [u8; 16],
}

impl Subscriber {
    fn new() -> Self {
        Self {
            secret: SecretKey::random(&mut OsRng),
            auth: rand::random(),
        }
    }

    fn keys(&self) -> SubscriptionKeys {
        SubscriptionKeys {
            p256dh: BASE64URL.encode(self.secret.public_key().to_encoded_point(false).as_bytes()),
            auth: BASE64URL.encode(self.auth),
        }
    }

    fn subscription(&self, user_id: &str, endpoint: &str) -> Subscription {
        Subscription::new(user_id, endpoint, self.keys())
    }
}

fn dispatcher_with(store: &Arc<MemorySubscriptionStore>, options: DeliveryOptions) -> PushDispatcher {
    let identity = SigningIdentity::generate("mailto:ops@example.com").unwrap();
    let store = Arc::clone(store) as Arc<dyn SubscriptionStore>;
    PushDispatcher::new(identity, store, options).unwrap()
}

fn dispatcher(store: &Arc<MemorySubscriptionStore>) -> PushDispatcher {
    dispatcher_with(store, DeliveryOptions::default())
}

async fn mount(server: &MockServer, route: &str, status: u16) {
    Mock::given(method("POST"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

fn payload() -> NotificationPayload {
    NotificationPayload::new("Quiz ready", "Your weekly quiz is waiting").with_url("/quizzes/42")
}

#[tokio::test]
async fn test_fan_out_counts_and_store_effects() {
    let server = MockServer::start().await;
    mount(&server, "/push/a", 201).await;
    mount(&server, "/push/b", 410).await;

    let endpoint_a = format!("{}/push/a", server.uri());
    let endpoint_b = format!("{}/push/b", server.uri());

    let store = Arc::new(MemorySubscriptionStore::default());
    store.upsert(Subscriber::new().subscription("u1", &endpoint_a)).await;
    store.upsert(Subscriber::new().subscription("u1", &endpoint_b)).await;
    store.upsert(Subscriber::new().subscription("u1", UNREACHABLE_ENDPOINT)).await;

    let report = dispatcher(&store).send_to_user("u1", &payload()).await.unwrap();
    assert_eq!(report, DeliveryReport { sent: 1, failed: 2 });

    assert!(store.get(&endpoint_b).await.is_none(), "410 deletes the subscription");

    let a = store.get(&endpoint_a).await.expect("A is kept");
    assert_eq!(a.health.success_count, 1);
    assert_eq!(a.health.failure_count, 0);

    let c = store.get(UNREACHABLE_ENDPOINT).await.expect("C is kept");
    assert_eq!(c.health.failure_count, 1);
    assert_eq!(c.health.success_count, 0);
}

#[tokio::test]
async fn test_batch_sums_reports() {
    let server = MockServer::start().await;
    mount(&server, "/push/a", 201).await;
    mount(&server, "/push/b", 410).await;
    mount(&server, "/push/d", 201).await;
    mount(&server, "/push/e", 200).await;

    let store = Arc::new(MemorySubscriptionStore::default());
    for route in ["a", "b"] {
        store
            .upsert(Subscriber::new().subscription("u1", &format!("{}/push/{route}", server.uri())))
            .await;
    }
    store.upsert(Subscriber::new().subscription("u1", UNREACHABLE_ENDPOINT)).await;
    for route in ["d", "e"] {
        store
            .upsert(Subscriber::new().subscription("u2", &format!("{}/push/{route}", server.uri())))
            .await;
    }

    let dispatcher = dispatcher(&store);
    let report = dispatcher.send_to_users(&["u1", "u2"], &payload()).await.unwrap();
    assert_eq!(
        report,
        BatchReport {
            total_sent: 3,
            total_failed: 2
        }
    );

    let empty: [&str; 0] = [];
    let report = dispatcher.send_to_users(&empty, &payload()).await.unwrap();
    assert_eq!(report, BatchReport::default());
}

#[tokio::test]
async fn test_no_subscriptions_makes_no_requests() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemorySubscriptionStore::default());
    store
        .upsert(Subscriber::new().subscription("someone-else", &format!("{}/push/x", server.uri())))
        .await;

    let report = dispatcher(&store).send_to_user("u1", &payload()).await.unwrap();
    assert_eq!(report, DeliveryReport { sent: 0, failed: 0 });
    server.verify().await;
}

#[tokio::test]
async fn test_missing_signing_key_disables_push() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let endpoint = format!("{}/push/a", server.uri());
    let store = Arc::new(MemorySubscriptionStore::default());
    store.upsert(Subscriber::new().subscription("u1", &endpoint)).await;

    let config = webpush_delivery::PushConfig::default();
    let shared = Arc::clone(&store) as Arc<dyn SubscriptionStore>;
    let dispatcher = PushDispatcher::from_config(&config, shared).unwrap();
    assert!(!dispatcher.is_enabled());
    assert!(dispatcher.public_key().is_none());

    let err = dispatcher.send_to_user("u1", &payload()).await.unwrap_err();
    assert!(matches!(err, PushError::Configuration(_)));
    let err = dispatcher.send_to_users(&["u1"], &payload()).await.unwrap_err();
    assert!(err.is_configuration());

    let sub = store.get(&endpoint).await.unwrap();
    assert_eq!(sub.health, Default::default(), "store is untouched");
    server.verify().await;
}

#[tokio::test]
async fn test_wire_contract() {
    let server = MockServer::start().await;
    mount(&server, "/push/a", 201).await;

    let subscriber = Subscriber::new();
    let endpoint = format!("{}/push/a", server.uri());
    let store = Arc::new(MemorySubscriptionStore::default());
    store.upsert(subscriber.subscription("u1", &endpoint)).await;

    let dispatcher = dispatcher(&store);
    let published = dispatcher.public_key().unwrap().to_string();
    dispatcher.send_to_user("u1", &payload()).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    let header = |name: &str| request.headers.get(name).unwrap().to_str().unwrap().to_string();

    assert_eq!(header("content-type"), "application/octet-stream");
    assert_eq!(header("content-encoding"), "aes128gcm");
    assert_eq!(header("ttl"), "86400");
    assert_eq!(header("urgency"), "normal");

    let authorization = header("authorization");
    let (token, key) = authorization
        .strip_prefix("vapid t=")
        .and_then(|rest| rest.split_once(", k="))
        .expect("vapid t=<token>, k=<key>");
    assert_eq!(key, published);

    let verifying_key = VerifyingKey::from_sec1_bytes(&BASE64URL.decode(key).unwrap()).unwrap();
    let claims = vapid::verify_token(token, &verifying_key).unwrap();
    assert_eq!(claims.aud, server.uri());
    assert_eq!(claims.sub, "mailto:ops@example.com");

    let body = &request.body;
    assert_eq!(u32::from_be_bytes(body[16..20].try_into().unwrap()), 4096);
    assert_eq!(body[20], 65);

    let plaintext = ece::decrypt(body, &subscriber.secret, &subscriber.auth).unwrap();
    let received: NotificationPayload = serde_json::from_slice(&plaintext).unwrap();
    assert_eq!(received, payload());
}

#[tokio::test]
async fn test_default_icon_and_badge_are_merged() {
    let server = MockServer::start().await;
    mount(&server, "/push/a", 201).await;

    let subscriber = Subscriber::new();
    let store = Arc::new(MemorySubscriptionStore::default());
    store
        .upsert(subscriber.subscription("u1", &format!("{}/push/a", server.uri())))
        .await;

    let options = DeliveryOptions {
        default_icon: Some("/icons/app-192.png".into()),
        default_badge: Some("/icons/badge-72.png".into()),
        ..DeliveryOptions::default()
    };
    dispatcher_with(&store, options)
        .send_to_user("u1", &payload())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let plaintext = ece::decrypt(&requests[0].body, &subscriber.secret, &subscriber.auth).unwrap();
    let received: NotificationPayload = serde_json::from_slice(&plaintext).unwrap();
    assert_eq!(received.icon.as_deref(), Some("/icons/app-192.png"));
    assert_eq!(received.badge.as_deref(), Some("/icons/badge-72.png"));
}

#[tokio::test]
async fn test_rejection_and_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push/rejected"))
        .respond_with(ResponseTemplate::new(413).set_body_string("Payload Too Large"))
        .mount(&server)
        .await;
    mount(&server, "/push/missing", 404).await;

    let rejected = format!("{}/push/rejected", server.uri());
    let missing = format!("{}/push/missing", server.uri());
    let store = Arc::new(MemorySubscriptionStore::default());
    let subscription = Subscriber::new().subscription("u1", &rejected);
    store.upsert(subscription.clone()).await;
    store.upsert(Subscriber::new().subscription("u1", &missing)).await;

    let dispatcher = dispatcher(&store);
    let outcome = dispatcher
        .deliver_to_endpoint(&subscription, &payload())
        .await
        .unwrap();
    assert_eq!(
        outcome,
        DeliveryOutcome::Rejected {
            status: 413,
            body: "Payload Too Large".into()
        }
    );

    let report = dispatcher.send_to_user("u1", &payload()).await.unwrap();
    assert_eq!(report, DeliveryReport { sent: 0, failed: 2 });
    assert!(store.get(&missing).await.is_none());
    assert_eq!(store.get(&rejected).await.unwrap().health.failure_count, 1);
}

#[tokio::test]
async fn test_large_rejection_body_is_capped() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("e".repeat(1 << 20)))
        .mount(&server)
        .await;

    let store = Arc::new(MemorySubscriptionStore::default());
    let subscription = Subscriber::new().subscription("u1", &format!("{}/push/a", server.uri()));
    store.upsert(subscription.clone()).await;

    let outcome = dispatcher(&store)
        .deliver_to_endpoint(&subscription, &payload())
        .await
        .unwrap();
    let (status, body) = match outcome {
        DeliveryOutcome::Rejected { status, body } => (status, body),
        other => panic!("500 must be a rejection, got {other:?}"),
    };
    assert_eq!(status, 500);
    assert_eq!(body.chars().count(), 501);
    assert!(body.starts_with("eee") && body.ends_with('…'));
}

#[tokio::test]
async fn test_bad_key_material_is_isolated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push/good"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/push/bad"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let good = format!("{}/push/good", server.uri());
    let bad = format!("{}/push/bad", server.uri());
    let store = Arc::new(MemorySubscriptionStore::default());
    store.upsert(Subscriber::new().subscription("u1", &good)).await;
    store
        .upsert(Subscription::new(
            "u1",
            &bad,
            SubscriptionKeys {
                p256dh: BASE64URL.encode([0x04_u8; 65]),
                auth: BASE64URL.encode([7u8; 16]),
            },
        ))
        .await;

    let dispatcher = dispatcher(&store);
    let bad_subscription = store.get(&bad).await.unwrap();
    assert!(matches!(
        dispatcher.deliver_to_endpoint(&bad_subscription, &payload()).await,
        Err(PushError::Crypto(_))
    ));

    let report = dispatcher.send_to_user("u1", &payload()).await.unwrap();
    assert_eq!(report, DeliveryReport { sent: 1, failed: 1 });
    assert_eq!(store.get(&bad).await.unwrap().health.failure_count, 1);
    server.verify().await;
}

#[tokio::test]
async fn test_oversized_payload_is_a_failure_not_a_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let store = Arc::new(MemorySubscriptionStore::default());
    store
        .upsert(Subscriber::new().subscription("u1", &format!("{}/push/a", server.uri())))
        .await;

    let huge = NotificationPayload::new("Digest", "x".repeat(ece::MAX_PLAINTEXT_LEN));
    let report = dispatcher(&store).send_to_user("u1", &huge).await.unwrap();
    assert_eq!(report, DeliveryReport { sent: 0, failed: 1 });
    server.verify().await;
}

#[tokio::test]
async fn test_slow_push_service_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let store = Arc::new(MemorySubscriptionStore::default());
    let subscription = Subscriber::new().subscription("u1", &format!("{}/push/slow", server.uri()));
    store.upsert(subscription.clone()).await;

    let options = DeliveryOptions {
        request_timeout: Duration::from_millis(200),
        ..DeliveryOptions::default()
    };
    let outcome = dispatcher_with(&store, options)
        .deliver_to_endpoint(&subscription, &payload())
        .await
        .unwrap();
    assert!(matches!(outcome, DeliveryOutcome::NetworkError(_)), "got {outcome:?}");
}
