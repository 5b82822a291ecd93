use crate::api_client::FullRevenueClient;
use crate::config::Config;
use crate::errors::AppError;
use crate::models::*;
use crate::poller::{PollHandle, PollState, StatusPoller};
use crate::routes;
use crate::session::{MemorySessionStore, SessionState};
use crate::signature::{ClientRect, PointerInput};
use crate::summary::SuccessSummary;
use crate::tracking::{Tracker, TrackingEvent};
use crate::wizard::kyc::{DocumentSlot, KycView};
use crate::wizard::prequal::FlowView;
use crate::wizard::{FlowOutcome, GamifiedFlow, KycWizard, RedirectParams};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use uuid::Uuid;

/// One browser tab: its session store plus the flow rebuilt from it.
pub struct FlowSession {
    store: Arc<MemorySessionStore>,
    flow: Mutex<GamifiedFlow>,
}

pub struct KycSession {
    wizard: Mutex<KycWizard>,
}

/// Shared application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub client: FullRevenueClient,
    pub tracker: Tracker,
    pub poller: StatusPoller,
    /// Flow sessions by id, evicted after `SESSION_TTL_SECS` idle.
    pub flows: Cache<String, Arc<FlowSession>>,
    pub kyc_sessions: Cache<String, Arc<KycSession>>,
    /// Running status pollers by application id. Eviction drops the handle,
    /// which stops its task. Idle pollers also stop on their own.
    pub polls: Cache<String, Arc<PollHandle>>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self, AppError> {
        config
            .validate()
            .map_err(|e| AppError::InternalError(e.to_string()))?;
        let client = FullRevenueClient::new(config.api_base_url.clone())?;
        let tracker = Tracker::new(client.clone(), config.merchant_id.clone());
        let poller = StatusPoller::new(client.clone(), config.poll_interval())
            .with_idle_timeout(config.status_idle());
        let ttl = config.session_ttl();

        Ok(Self {
            flows: Cache::builder()
                .time_to_idle(ttl)
                .max_capacity(10_000)
                .build(),
            kyc_sessions: Cache::builder()
                .time_to_idle(ttl)
                .max_capacity(10_000)
                .build(),
            polls: Cache::builder()
                .time_to_idle(config.status_idle())
                .max_capacity(10_000)
                .build(),
            config,
            client,
            tracker,
            poller,
        })
    }

    fn restore_flow(&self, store: Arc<MemorySessionStore>) -> GamifiedFlow {
        GamifiedFlow::restore(
            self.client.clone(),
            SessionState::new(store),
            self.tracker.clone(),
            &self.config,
        )
    }

    async fn flow_session(&self, session_id: &str) -> Result<Arc<FlowSession>, AppError> {
        self.flows
            .get(session_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("Flow session {} not found", session_id)))
    }

    async fn kyc_session(&self, session_id: &str) -> Result<Arc<KycSession>, AppError> {
        self.kyc_sessions
            .get(session_id)
            .await
            .ok_or_else(|| AppError::NotFound(format!("KYC session {} not found", session_id)))
    }
}

/// The `isSubmitting` gate: one transition at a time per session.
fn gate<T>(lock: &Mutex<T>) -> Result<MutexGuard<'_, T>, AppError> {
    lock.try_lock().map_err(|_| AppError::Busy)
}

#[derive(Debug, Serialize)]
pub struct FlowResponse {
    pub session_id: String,
    pub view: FlowView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

/// Browser commands on the pre-qualification flow.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowCommand {
    Identity(IdentityData),
    Consent(ConsentForm),
    ApplyNow,
    Continue,
    Connections(ConnectionsForm),
    Fiscal(FiscalData),
    ApplyFinal,
    Back,
    ConnectFacebook {
        #[serde(default)]
        google_business_url: Option<String>,
    },
}

impl FlowCommand {
    fn name(&self) -> &'static str {
        match self {
            FlowCommand::Identity(_) => "identity",
            FlowCommand::Consent(_) => "consent",
            FlowCommand::ApplyNow => "apply_now",
            FlowCommand::Continue => "continue",
            FlowCommand::Connections(_) => "connections",
            FlowCommand::Fiscal(_) => "fiscal",
            FlowCommand::ApplyFinal => "apply_final",
            FlowCommand::Back => "back",
            FlowCommand::ConnectFacebook { .. } => "connect_facebook",
        }
    }
}

/// Health check endpoint.
pub async fn health() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "full-revenue-bff",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

/// POST /api/v1/flows
///
/// Starts a new flow, or with `?session_id=` rebuilds an existing one from its
/// session store exactly as a page reload would.
pub async fn create_flow(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SessionQuery>,
) -> Result<Json<FlowResponse>, AppError> {
    if let Some(session_id) = params.session_id {
        let session = state.flow_session(&session_id).await?;
        let mut flow = gate(&session.flow)?;
        *flow = state.restore_flow(session.store.clone());
        tracing::info!("Flow {} reloaded at {}", session_id, flow.step());
        return Ok(Json(FlowResponse {
            session_id,
            view: flow.view(),
            redirect: None,
        }));
    }

    let session_id = Uuid::new_v4().to_string();
    let store = Arc::new(MemorySessionStore::new());
    let flow = state.restore_flow(store.clone());
    let view = flow.view();

    state
        .flows
        .insert(
            session_id.clone(),
            Arc::new(FlowSession {
                store,
                flow: Mutex::new(flow),
            }),
        )
        .await;
    tracing::info!("Flow {} started", session_id);

    Ok(Json(FlowResponse {
        session_id,
        view,
        redirect: None,
    }))
}

/// GET /api/v1/flows/:session_id
pub async fn get_flow(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<FlowResponse>, AppError> {
    let session = state.flow_session(&session_id).await?;
    let flow = session.flow.lock().await;
    Ok(Json(FlowResponse {
        session_id,
        view: flow.view(),
        redirect: None,
    }))
}

/// POST /api/v1/flows/:session_id/events
pub async fn flow_event(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(command): Json<FlowCommand>,
) -> Result<Json<FlowResponse>, AppError> {
    let session = state.flow_session(&session_id).await?;
    let mut flow = gate(&session.flow)?;
    tracing::info!("Flow {} event {} at {}", session_id, command.name(), flow.step());

    let outcome = match command {
        FlowCommand::Identity(data) => flow.submit_identity(data).await?,
        FlowCommand::Consent(form) => flow.submit_consent(form).await?,
        FlowCommand::ApplyNow => flow.apply_now().await?,
        FlowCommand::Continue => flow.continue_flow()?,
        FlowCommand::Connections(form) => flow.complete_connections(form).await?,
        FlowCommand::Fiscal(form) => flow.complete_fiscal(form).await?,
        FlowCommand::ApplyFinal => flow.apply_final().await?,
        FlowCommand::Back => flow.back()?,
        FlowCommand::ConnectFacebook {
            google_business_url,
        } => flow.connect_facebook(google_business_url)?,
    };

    let redirect = match outcome {
        FlowOutcome::Navigate(target) => Some(target),
        FlowOutcome::Step(_) => None,
    };
    Ok(Json(FlowResponse {
        session_id,
        view: flow.view(),
        redirect,
    }))
}

/// GET /api/v1/flows/:session_id/oauth-return
///
/// The redirect boundary is treated as a restart: the flow is rebuilt from
/// its store before the query parameters are applied. The response points
/// the browser at the bare apply route so the parameters are not replayed.
pub async fn oauth_return(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(params): Query<RedirectParams>,
) -> Result<Json<FlowResponse>, AppError> {
    let session = state.flow_session(&session_id).await?;
    let mut flow = gate(&session.flow)?;

    *flow = state.restore_flow(session.store.clone());
    flow.resume_after_redirect(params);

    Ok(Json(FlowResponse {
        session_id,
        view: flow.view(),
        redirect: Some(routes::APPLY.to_string()),
    }))
}

/// GET /api/v1/status/:application_id
///
/// The first request starts a poller; later requests read its latest state.
/// A poller that went idle is replaced, and an error is reported once so the
/// next request polls again.
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(application_id): Path<String>,
) -> Json<PollState> {
    let mut handle = status_handle(&state, &application_id).await;
    if handle.is_stale() {
        tracing::debug!("Restarting status poller for {}", application_id);
        state.polls.invalidate(&application_id).await;
        handle = status_handle(&state, &application_id).await;
    }
    handle.touch();

    let current = handle.state();
    if matches!(current, PollState::Error { .. }) {
        state.polls.invalidate(&application_id).await;
    }
    Json(current)
}

async fn status_handle(state: &AppState, application_id: &str) -> Arc<PollHandle> {
    let poller = state.poller.clone();
    let id = application_id.to_string();
    state
        .polls
        .get_with(application_id.to_string(), async move {
            Arc::new(poller.start(id))
        })
        .await
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub event_name: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// POST /api/v1/events
///
/// Page-level funnel events from the browser. Unknown names are rejected;
/// delivery to the backend is best-effort.
pub async fn track_event(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TrackRequest>,
) -> Result<StatusCode, AppError> {
    let event = TrackingEvent::from_name(&request.event_name).ok_or_else(|| {
        AppError::BadRequest(format!("Unknown event: {}", request.event_name))
    })?;
    state.tracker.track(event, request.metadata);
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Serialize)]
pub struct KycResponse {
    pub kyc_session_id: String,
    pub view: KycView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

/// POST /api/v1/kyc/:application_id
///
/// Runs the entry gate. With `?session_id=` the wizard shares that flow's
/// session store, which carries the offer amounts and timestamps; an unknown
/// session is not found.
pub async fn open_kyc(
    State(state): State<Arc<AppState>>,
    Path(application_id): Path<String>,
    Query(params): Query<SessionQuery>,
) -> Result<Json<KycResponse>, AppError> {
    let store = match &params.session_id {
        Some(session_id) => state.flow_session(session_id).await?.store.clone(),
        None => Arc::new(MemorySessionStore::new()),
    };

    let wizard = KycWizard::open(
        state.client.clone(),
        SessionState::new(store),
        &application_id,
        &state.config,
    )
    .await?;
    let view = wizard.view();

    let kyc_session_id = Uuid::new_v4().to_string();
    state
        .kyc_sessions
        .insert(
            kyc_session_id.clone(),
            Arc::new(KycSession {
                wizard: Mutex::new(wizard),
            }),
        )
        .await;

    Ok(Json(KycResponse {
        kyc_session_id,
        view,
        redirect: None,
    }))
}

/// Browser commands on the KYC wizard.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KycCommand {
    Personal(PersonalInfo),
    Address(AddressInfo),
    Bank(BankAccount),
    Scroll {
        scroll_top: f64,
        client_height: f64,
        scroll_height: f64,
    },
    Stroke {
        rect: ClientRect,
        points: Vec<PointerInput>,
    },
    ClearSignature,
    Agree {
        agreed: bool,
    },
    Sign,
    Authorize {
        authorized: bool,
    },
    Confirm,
    Back,
}

/// POST /api/v1/kyc/sessions/:kyc_session_id/events
pub async fn kyc_event(
    State(state): State<Arc<AppState>>,
    Path(kyc_session_id): Path<String>,
    Json(command): Json<KycCommand>,
) -> Result<Json<KycResponse>, AppError> {
    let session = state.kyc_session(&kyc_session_id).await?;
    let mut wizard = gate(&session.wizard)?;

    let mut redirect = None;
    match command {
        KycCommand::Personal(data) => {
            wizard.submit_personal(data)?;
        }
        KycCommand::Address(data) => {
            wizard.submit_address(data)?;
        }
        KycCommand::Bank(data) => {
            wizard.submit_bank(data)?;
        }
        KycCommand::Scroll {
            scroll_top,
            client_height,
            scroll_height,
        } => {
            wizard.contract_scrolled(scroll_top, client_height, scroll_height)?;
        }
        KycCommand::Stroke { rect, points } => wizard.draw_stroke(&rect, &points)?,
        KycCommand::ClearSignature => wizard.clear_signature()?,
        KycCommand::Agree { agreed } => wizard.set_agreed(agreed)?,
        KycCommand::Sign => {
            wizard.sign().await?;
        }
        KycCommand::Authorize { authorized } => wizard.set_authorized(authorized)?,
        KycCommand::Confirm => redirect = Some(wizard.confirm().await?),
        KycCommand::Back => {
            wizard.back()?;
        }
    }

    Ok(Json(KycResponse {
        kyc_session_id,
        view: wizard.view(),
        redirect,
    }))
}

/// POST /api/v1/kyc/sessions/:kyc_session_id/documents
///
/// Multipart upload of `id_front`, `id_back` and optional `proof_of_address`.
/// Files accumulate across requests; the step advances once both INE sides
/// are present.
pub async fn kyc_documents(
    State(state): State<Arc<AppState>>,
    Path(kyc_session_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<KycResponse>, AppError> {
    let session = state.kyc_session(&kyc_session_id).await?;

    let mut uploads = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let slot: DocumentSlot = field.name().unwrap_or_default().parse()?;
        let file_name = field.file_name().unwrap_or("document").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read {}: {}", file_name, e)))?;

        uploads.push((
            slot,
            DocumentFile {
                file_name,
                content_type,
                bytes: bytes.to_vec(),
            },
        ));
    }

    let mut wizard = gate(&session.wizard)?;
    for (slot, file) in uploads {
        wizard.attach_document(slot, file)?;
    }
    wizard.submit_documents()?;

    Ok(Json(KycResponse {
        kyc_session_id,
        view: wizard.view(),
        redirect: None,
    }))
}

/// GET /api/v1/kyc/sessions/:kyc_session_id/summary
pub async fn kyc_summary(
    State(state): State<Arc<AppState>>,
    Path(kyc_session_id): Path<String>,
) -> Result<Json<SuccessSummary>, AppError> {
    let session = state.kyc_session(&kyc_session_id).await?;
    let wizard = session.wizard.lock().await;
    Ok(Json(wizard.success_summary()))
}

/// INE photos plus proof of address.
pub const MAX_UPLOAD_BYTES: usize = 15 * 1024 * 1024;

/// Flow, status and KYC routes. Rate limiting is layered on by the binary.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/flows", post(create_flow))
        .route("/api/v1/flows/:session_id", get(get_flow))
        .route("/api/v1/flows/:session_id/events", post(flow_event))
        .route("/api/v1/flows/:session_id/oauth-return", get(oauth_return))
        .route("/api/v1/status/:application_id", get(get_status))
        .route("/api/v1/events", post(track_event))
        .route("/api/v1/kyc/:application_id", post(open_kyc))
        .route("/api/v1/kyc/sessions/:kyc_session_id/events", post(kyc_event))
        .route(
            "/api/v1/kyc/sessions/:kyc_session_id/documents",
            post(kyc_documents),
        )
        .route("/api/v1/kyc/sessions/:kyc_session_id/summary", get(kyc_summary))
        .layer(
            ServiceBuilder::new()
                // Multipart otherwise stops at axum's 2 MB default.
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES)),
        )
}
