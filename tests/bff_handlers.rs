/// BFF handler tests
/// Calls the axum handlers directly with a mocked backend behind them
use axum::body::{to_bytes, Body};
use axum::extract::{FromRequest, Multipart, Path, Query, State};
use axum::http::{header, Request, StatusCode};
use axum::Json;
use full_revenue_flow::config::Config;
use full_revenue_flow::errors::AppError;
use full_revenue_flow::handlers::{self, AppState, FlowCommand, KycCommand, SessionQuery, TrackRequest};
use full_revenue_flow::models::*;
use full_revenue_flow::poller::PollState;
use full_revenue_flow::wizard::{FlowStep, KycStep};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_test_state(server: &MockServer) -> Arc<AppState> {
    let mut config = Config::for_base_url(server.uri());
    config.poll_interval_ms = 20;
    Arc::new(AppState::new(config).unwrap())
}

async fn backend_requests(server: &MockServer, suffix: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path().ends_with(suffix))
        .count()
}

fn application_json(id: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "merchant_id": "demo-merchant-001",
        "decision_status": status
    })
}

fn no_session() -> Query<SessionQuery> {
    Query(SessionQuery { session_id: None })
}

fn identity() -> FlowCommand {
    FlowCommand::Identity(IdentityData {
        legal_name: "Taquería X".to_string(),
        address: "Av. Reforma 1, CDMX".to_string(),
        email: "a@x.com".to_string(),
        ..Default::default()
    })
}

#[tokio::test]
async fn test_health() {
    let (status, Json(body)) = handlers::health().await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_flow_session_lifecycle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/full-revenue/applications"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "app-7" })))
        .expect(1)
        .mount(&server)
        .await;
    let state = create_test_state(&server);

    let Json(created) = handlers::create_flow(State(state.clone()), no_session())
        .await
        .unwrap();
    assert_eq!(created.view.step, FlowStep::Identity);
    let session_id = created.session_id;

    let Json(after) = handlers::flow_event(
        State(state.clone()),
        Path(session_id.clone()),
        Json(identity()),
    )
    .await
    .unwrap();
    assert_eq!(after.view.step, FlowStep::Consent);
    assert!(after.redirect.is_none());

    // A reload rebuilds from the session store and lands on the same step.
    let Json(reloaded) = handlers::create_flow(
        State(state.clone()),
        Query(SessionQuery {
            session_id: Some(session_id.clone()),
        }),
    )
    .await
    .unwrap();
    assert_eq!(reloaded.view.step, FlowStep::Consent);
    assert_eq!(reloaded.view.application_id.as_deref(), Some("app-7"));
    assert_eq!(reloaded.view.identity.legal_name, "Taquería X");
}

#[tokio::test]
async fn test_illegal_event_is_rejected() {
    let server = MockServer::start().await;
    let state = create_test_state(&server);
    let Json(created) = handlers::create_flow(State(state.clone()), no_session())
        .await
        .unwrap();

    let err = handlers::flow_event(
        State(state.clone()),
        Path(created.session_id.clone()),
        Json(FlowCommand::ApplyNow),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::IllegalTransition { .. }));

    let Json(view) = handlers::get_flow(State(state), Path(created.session_id))
        .await
        .unwrap();
    assert_eq!(view.view.step, FlowStep::Identity);
    assert!(view.view.error.is_some());
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let server = MockServer::start().await;
    let state = create_test_state(&server);

    let err = handlers::get_flow(State(state), Path("nope".to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_concurrent_event_is_busy() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/full-revenue/applications"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({ "id": "app-7" }))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;
    let state = create_test_state(&server);
    let Json(created) = handlers::create_flow(State(state.clone()), no_session())
        .await
        .unwrap();

    let first = tokio::spawn(handlers::flow_event(
        State(state.clone()),
        Path(created.session_id.clone()),
        Json(identity()),
    ));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = handlers::flow_event(
        State(state.clone()),
        Path(created.session_id.clone()),
        Json(identity()),
    )
    .await;
    assert!(matches!(second, Err(AppError::Busy)));

    let Json(done) = first.await.unwrap().unwrap();
    assert_eq!(done.view.step, FlowStep::Consent);
}

#[tokio::test]
async fn test_status_requests_share_one_poller() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/full-revenue/applications/app-3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "app-3",
            "merchant_id": "demo-merchant-001",
            "decision_status": "APPROVED"
        })))
        .expect(1)
        .mount(&server)
        .await;
    let state = create_test_state(&server);

    let mut latest = None;
    for _ in 0..50 {
        let Json(polled) =
            handlers::get_status(State(state.clone()), Path("app-3".to_string())).await;
        let done = polled.is_final();
        latest = Some(polled);
        if done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let latest: PollState = latest.unwrap();

    assert_eq!(
        latest.application().map(|a| a.decision_status),
        Some(DecisionStatus::Approved)
    );
}

#[tokio::test]
async fn test_status_error_is_retried_on_next_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/full-revenue/applications/app-4"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "error": "boom" })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/full-revenue/applications/app-4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(application_json("app-4", "APPROVED")))
        .mount(&server)
        .await;
    let state = create_test_state(&server);

    let mut saw_error = false;
    let mut latest = PollState::Loading;
    for _ in 0..50 {
        let Json(polled) =
            handlers::get_status(State(state.clone()), Path("app-4".to_string())).await;
        saw_error |= matches!(polled, PollState::Error { .. });
        latest = polled;
        if latest.application().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(saw_error);
    assert_eq!(
        latest.application().map(|a| a.decision_status),
        Some(DecisionStatus::Approved)
    );
    assert_eq!(backend_requests(&server, "/app-4").await, 2);
}

#[tokio::test]
async fn test_status_polling_stops_without_viewers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/full-revenue/applications/app-8"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(application_json("app-8", "UNDERWRITING_PENDING")),
        )
        .mount(&server)
        .await;
    let mut config = Config::for_base_url(server.uri());
    config.poll_interval_ms = 20;
    config.status_idle_ms = 80;
    let state = Arc::new(AppState::new(config).unwrap());

    handlers::get_status(State(state.clone()), Path("app-8".to_string())).await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    let after_idle = backend_requests(&server, "/app-8").await;
    assert!(after_idle >= 1);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend_requests(&server, "/app-8").await, after_idle);

    // A returning viewer gets a fresh poller.
    handlers::get_status(State(state.clone()), Path("app-8".to_string())).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(backend_requests(&server, "/app-8").await > after_idle);
}

#[tokio::test]
async fn test_track_event_checks_catalogue() {
    let server = MockServer::start().await;
    let state = create_test_state(&server);

    let status = handlers::track_event(
        State(state.clone()),
        Json(TrackRequest {
            event_name: "full_revenue_banner_clicked".to_string(),
            metadata: Some(json!({ "placement": "home" })),
        }),
    )
    .await
    .unwrap();
    assert_eq!(status, StatusCode::ACCEPTED);

    let err = handlers::track_event(
        State(state),
        Json(TrackRequest {
            event_name: "made_up_event".to_string(),
            metadata: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

fn multipart_request(uri: &str, parts: &[(&str, &str, &str)]) -> Request<Body> {
    let boundary = "full-revenue-test-boundary";
    let mut body = String::new();
    for (name, file_name, content) in parts {
        body.push_str(&format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/jpeg\r\n\r\n{}\r\n",
            boundary, name, file_name, content
        ));
    }
    body.push_str(&format!("--{}--\r\n", boundary));

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

async fn mount_approved(server: &MockServer, id: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/full-revenue/applications/{}", id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(application_json(id, "APPROVED")))
        .mount(server)
        .await;
}

/// Opens a KYC session and fills the first three steps.
async fn kyc_at_documents(state: &Arc<AppState>, application_id: &str) -> String {
    let Json(opened) = handlers::open_kyc(
        State(state.clone()),
        Path(application_id.to_string()),
        no_session(),
    )
    .await
    .unwrap();
    assert_eq!(opened.view.step, KycStep::Personal);
    let kid = opened.kyc_session_id;

    let commands = vec![
        KycCommand::Personal(PersonalInfo {
            first_name: "Ana".to_string(),
            last_name: "López".to_string(),
            birth_date: "1990-02-03".to_string(),
            cedula: "LOPA900203AB1".to_string(),
            nationality: "Mexicana".to_string(),
            marital_status: "soltero".to_string(),
        }),
        KycCommand::Address(AddressInfo {
            street: "Av. Reforma 1".to_string(),
            neighborhood: String::new(),
            postal_code: "06600".to_string(),
            city: "CDMX".to_string(),
            state: "Ciudad de México".to_string(),
            country: "México".to_string(),
        }),
        KycCommand::Bank(BankAccount {
            clabe: "012180001234567891".to_string(),
            bank_name: "BBVA".to_string(),
            account_type: "cheques".to_string(),
            account_holder: "Ana López".to_string(),
        }),
    ];
    for command in commands {
        handlers::kyc_event(State(state.clone()), Path(kid.clone()), Json(command))
            .await
            .unwrap();
    }
    kid
}

#[tokio::test]
async fn test_kyc_documents_upload_advances_to_contract() {
    let server = MockServer::start().await;
    mount_approved(&server, "app-5").await;
    let state = create_test_state(&server);
    let kid = kyc_at_documents(&state, "app-5").await;

    // Front only: the step holds and reports the missing side.
    let multipart = Multipart::from_request(
        multipart_request("/", &[("id_front", "front.jpg", "FRONT")]),
        &(),
    )
    .await
    .unwrap();
    let err = handlers::kyc_documents(State(state.clone()), Path(kid.clone()), multipart)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let multipart = Multipart::from_request(
        multipart_request("/", &[("id_back", "back.jpg", "BACK")]),
        &(),
    )
    .await
    .unwrap();
    let Json(uploaded) = handlers::kyc_documents(State(state.clone()), Path(kid.clone()), multipart)
        .await
        .unwrap();
    assert_eq!(uploaded.view.step, KycStep::Contract);
    assert!(uploaded.view.documents.id_front);
    assert!(uploaded.view.documents.id_back);
    assert!(!uploaded.view.documents.proof_of_address);
}

#[tokio::test]
async fn test_phone_sized_photos_pass_the_router() {
    let server = MockServer::start().await;
    mount_approved(&server, "app-9").await;
    let state = create_test_state(&server);
    let kid = kyc_at_documents(&state, "app-9").await;
    let app = handlers::api_router().with_state(state.clone());

    let photo = "A".repeat(3 * 1024 * 1024);
    let request = multipart_request(
        &format!("/api/v1/kyc/sessions/{}/documents", kid),
        &[
            ("id_front", "front.jpg", photo.as_str()),
            ("id_back", "back.jpg", photo.as_str()),
        ],
    );
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["view"]["step"], "contract");

    // Past the upload cap the request is refused before the handler runs.
    let oversized = "A".repeat(handlers::MAX_UPLOAD_BYTES + 1);
    let request = multipart_request(
        &format!("/api/v1/kyc/sessions/{}/documents", kid),
        &[("proof_of_address", "bill.jpg", oversized.as_str())],
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_kyc_with_unknown_flow_session_is_not_found() {
    let server = MockServer::start().await;
    mount_approved(&server, "app-2").await;
    let state = create_test_state(&server);

    let err = handlers::open_kyc(
        State(state),
        Path("app-2".to_string()),
        Query(SessionQuery {
            session_id: Some("expired".to_string()),
        }),
    )
    .await
    .err()
    .unwrap();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_kyc_refused_for_pending_application() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/full-revenue/applications/app-6"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "app-6",
            "merchant_id": "demo-merchant-001",
            "decision_status": "UNDERWRITING_PENDING"
        })))
        .mount(&server)
        .await;
    let state = create_test_state(&server);

    let err = handlers::open_kyc(State(state), Path("app-6".to_string()), no_session())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, AppError::BadRequest(_)));
}
