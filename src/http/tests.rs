use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use super::{HttpConfig, build_router};
use crate::session::mock::{Call, MockFactory, wait_until};
use crate::session::transport::LifecycleEvent;
use crate::session::{Identity, SessionConfig, SessionManager, SessionStatus};

const KEY: &str = "s3cret";

async fn setup(api_key: Option<&str>) -> (Router, SessionManager, Arc<MockFactory>) {
    let factory = Arc::new(MockFactory::default());
    let config = SessionConfig {
        reconnect_delay: Duration::from_millis(50),
        ..SessionConfig::default()
    };
    let (session, _rx) = SessionManager::new(config, factory.clone());
    session.start().await;
    wait_until("first session", || factory.created_count() == 1).await;

    let http = HttpConfig {
        api_key: api_key.map(str::to_string),
        ..HttpConfig::default()
    };
    (build_router(session.clone(), &http), session, factory)
}

async fn reach(session: &SessionManager, status: SessionStatus) {
    for _ in 0..400 {
        if session.status().await.status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session never reached {status}");
}

fn get(uri: &str, key: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(key) = key {
        builder = builder.header("x-api-key", key);
    }
    builder.body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn call(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

mod auth {
    use super::*;

    #[tokio::test]
    async fn test_health_is_always_open() {
        let (router, _session, _factory) = setup(Some(KEY)).await;
        for uri in ["/health", "/"] {
            let (status, body) = call(&router, get(uri, None)).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({ "status": "ok", "whatsapp": "initializing" }));
        }
    }

    #[tokio::test]
    async fn test_protected_routes_need_key() {
        let (router, _session, factory) = setup(Some(KEY)).await;

        let (status, body) = call(&router, get("/status", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "error": "Unauthorized" }));

        let (status, _) = call(&router, get("/status", Some("wrong"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let send = post("/send", json!({ "phone": "1", "message": "x" }));
        let (status, _) = call(&router, send).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(!factory.all_calls().iter().any(|c| matches!(c, Call::Send { .. })));

        let (status, _) = call(&router, get("/status", Some(KEY))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_no_key_configured_leaves_api_open() {
        let (router, _session, _factory) = setup(None).await;
        let (status, _) = call(&router, get("/status", None)).await;
        assert_eq!(status, StatusCode::OK);
    }
}

mod status {
    use super::*;

    #[tokio::test]
    async fn test_reports_qr_while_pending() {
        let (router, session, factory) = setup(None).await;
        factory.latest().emit(LifecycleEvent::CredentialReady("2@abc".into()));
        reach(&session, SessionStatus::CredentialPending).await;

        let (_, body) = call(&router, get("/status", None)).await;
        assert_eq!(body["status"], "qr");
        assert_eq!(body["qr"], "2@abc");
        assert_eq!(body["pairingCode"], Value::Null);
        assert_eq!(body["info"], Value::Null);
        assert!(body["updatedAt"].is_string());
    }

    #[tokio::test]
    async fn test_reports_identity_when_ready() {
        let (router, session, factory) = setup(None).await;
        factory.latest().emit(LifecycleEvent::Ready(Identity {
            number: "905551112233".into(),
            name: Some("Kuaför".into()),
        }));
        reach(&session, SessionStatus::Ready).await;

        let (_, body) = call(&router, get("/status", None)).await;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["qr"], Value::Null);
        assert_eq!(body["info"], json!({ "number": "905551112233", "name": "Kuaför" }));
    }
}

mod pair {
    use super::*;

    #[tokio::test]
    async fn test_missing_phone_is_bad_request() {
        let (router, _session, _factory) = setup(None).await;
        for body in [json!({}), json!({ "phone": "" }), json!("nonsense")] {
            let (status, body) = call(&router, post("/pair", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body, json!({ "error": "Phone number required" }));
        }
    }

    #[tokio::test]
    async fn test_invalid_phone_is_bad_request() {
        let (router, _session, _factory) = setup(None).await;
        let (status, body) = call(&router, post("/pair", json!({ "phone": "abc" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_code_returned_and_reported() {
        let (router, session, factory) = setup(None).await;
        factory.latest().emit(LifecycleEvent::CredentialReady("2@abc".into()));
        reach(&session, SessionStatus::CredentialPending).await;

        let pair = post("/pair", json!({ "phone": "0532 123 45 67" }));
        let (status, body) = call(&router, pair).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "code": "ABCD-1234" }));
        assert!(factory.latest().calls().contains(&Call::PairingCode("905321234567".into())));

        let (_, body) = call(&router, get("/status", None)).await;
        assert_eq!(body["pairingCode"], "ABCD-1234");
        assert_eq!(body["qr"], Value::Null);
    }

    #[tokio::test]
    async fn test_already_connected_is_soft_failure() {
        let (router, session, factory) = setup(None).await;
        factory.latest().emit(LifecycleEvent::Ready(Identity {
            number: "905551112233".into(),
            name: None,
        }));
        reach(&session, SessionStatus::Ready).await;

        let (status, body) = call(&router, post("/pair", json!({ "phone": "05321234567" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "session is already connected");
    }
}

mod send {
    use super::*;

    #[tokio::test]
    async fn test_missing_fields_are_bad_request() {
        let (router, _session, _factory) = setup(None).await;
        for body in [json!({ "phone": "05321234567" }), json!({ "message": "hi" }), json!({})] {
            let (status, body) = call(&router, post("/send", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body, json!({ "error": "Phone and message required" }));
        }
    }

    #[tokio::test]
    async fn test_sends_to_normalized_address() {
        let (router, _session, factory) = setup(None).await;
        let (status, body) = call(
            &router,
            post("/send", json!({ "phone": "0532 123 45 67", "message": "Randevunuz yarın" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));
        assert!(factory.latest().calls().contains(&Call::Send {
            chat_id: "905321234567@c.us".into(),
            body: "Randevunuz yarın".into(),
        }));
    }

    #[tokio::test]
    async fn test_empty_message_is_bad_request() {
        let (router, _session, _factory) = setup(None).await;
        let (status, body) =
            call(&router, post("/send", json!({ "phone": "05321234567", "message": "  " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_transport_error_passed_through() {
        let (router, _session, factory) = setup(None).await;
        factory.behavior.fail_send.store(true, Ordering::SeqCst);
        let (status, body) =
            call(&router, post("/send", json!({ "phone": "05321234567", "message": "hi" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({ "success": false, "error": "Evaluation failed: chat not found" })
        );
    }
}

mod logout {
    use super::*;

    #[tokio::test]
    async fn test_logout_leaves_ready() {
        let (router, session, factory) = setup(None).await;
        factory.latest().emit(LifecycleEvent::Ready(Identity {
            number: "905551112233".into(),
            name: None,
        }));
        reach(&session, SessionStatus::Ready).await;

        let (status, body) = call(&router, post("/logout", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));
        assert_ne!(session.status().await.status, SessionStatus::Ready);
    }

    #[tokio::test]
    async fn test_logout_failure_is_reported() {
        let (router, session, factory) = setup(None).await;
        factory.behavior.fail_logout.store(true, Ordering::SeqCst);
        let (status, body) = call(&router, post("/logout", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Protocol error: target closed");
        assert_ne!(session.status().await.status, SessionStatus::Ready);
    }
}

mod cors {
    use super::*;

    #[tokio::test]
    async fn test_configured_origin_is_echoed() {
        let factory = Arc::new(MockFactory::default());
        let (session, _rx) = SessionManager::new(SessionConfig::default(), factory);
        let http = HttpConfig {
            cors_origin: Some("https://panel.example.com".into()),
            ..HttpConfig::default()
        };
        let router = build_router(session, &http);

        let req = Request::builder()
            .uri("/health")
            .header("origin", "https://panel.example.com")
            .body(Body::empty())
            .unwrap();
        let response = router.oneshot(req).await.unwrap();
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "https://panel.example.com"
        );
    }
}
