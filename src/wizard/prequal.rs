//! Seven-stage pre-qualification flow.
//!
//! [`transition`] is the whole state table: every operation on [`GamifiedFlow`]
//! asks it first and only then performs side effects. Session writes happen
//! after a step has completed, so a failed call leaves persisted state as it
//! was before the attempt.

use crate::api_client::FullRevenueClient;
use crate::config::Config;
use crate::errors::{AppError, FieldError, ResultExt};
use crate::models::{
    ApplicationFormData, ConnectionsForm, ConsentForm, FiscalData, IdentityData, OfferAmounts,
};
use crate::offer::{compute_conditions, format_compact, format_mxn, Conditions, OfferStage};
use crate::routes;
use crate::session::SessionState;
use crate::tracking::{Tracker, TrackingEvent};
use crate::validation;
use crate::wizard::{field_details, inline_message};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const START_FAILED: &str = "Error al iniciar la solicitud. Intentá de nuevo.";
const MISSING_BUSINESS_DATA: &str =
    "Faltan datos del negocio. Volvé al inicio y completá el formulario.";
const BUSINESS_DATA_FIRST: &str = "Primero completá los datos del negocio.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowStep {
    Identity,
    Consent,
    Offer1,
    Connections,
    Offer2,
    Fiscal,
    Offer3,
}

impl FlowStep {
    pub const ALL: [FlowStep; 7] = [
        FlowStep::Identity,
        FlowStep::Consent,
        FlowStep::Offer1,
        FlowStep::Connections,
        FlowStep::Offer2,
        FlowStep::Fiscal,
        FlowStep::Offer3,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FlowStep::Identity => "identity",
            FlowStep::Consent => "consent",
            FlowStep::Offer1 => "offer1",
            FlowStep::Connections => "connections",
            FlowStep::Offer2 => "offer2",
            FlowStep::Fiscal => "fiscal",
            FlowStep::Offer3 => "offer3",
        }
    }

    /// Reverse edge followed by "back". `None` only for the first step.
    pub fn previous(self) -> Option<FlowStep> {
        match self {
            FlowStep::Identity => None,
            FlowStep::Consent => Some(FlowStep::Identity),
            FlowStep::Offer1 => Some(FlowStep::Consent),
            FlowStep::Connections => Some(FlowStep::Offer1),
            FlowStep::Offer2 => Some(FlowStep::Connections),
            FlowStep::Fiscal => Some(FlowStep::Offer2),
            FlowStep::Offer3 => Some(FlowStep::Fiscal),
        }
    }

    pub fn position(self) -> usize {
        match self {
            FlowStep::Identity => 0,
            FlowStep::Consent => 1,
            FlowStep::Offer1 => 2,
            FlowStep::Connections => 3,
            FlowStep::Offer2 => 4,
            FlowStep::Fiscal => 5,
            FlowStep::Offer3 => 6,
        }
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowStep {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FlowStep::ALL
            .into_iter()
            .find(|step| step.as_str() == s)
            .ok_or_else(|| AppError::BadRequest(format!("Unknown flow step: {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEvent {
    IdentitySubmitted,
    ConsentConfirmed,
    ApplyNow,
    Continue,
    ConnectionsCompleted,
    ConnectFacebook,
    FiscalCompleted,
    ApplyFinal,
    Back,
}

impl FlowEvent {
    pub fn name(self) -> &'static str {
        match self {
            FlowEvent::IdentitySubmitted => "identity_submitted",
            FlowEvent::ConsentConfirmed => "consent_confirmed",
            FlowEvent::ApplyNow => "apply_now",
            FlowEvent::Continue => "continue",
            FlowEvent::ConnectionsCompleted => "connections_completed",
            FlowEvent::ConnectFacebook => "connect_facebook",
            FlowEvent::FiscalCompleted => "fiscal_completed",
            FlowEvent::ApplyFinal => "apply_final",
            FlowEvent::Back => "back",
        }
    }
}

/// Which optional data a submission carries and where it lands afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmitPlan {
    pub with_social: bool,
    pub with_fiscal: bool,
    pub go_to_kyc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Goto(FlowStep),
    Submit(SubmitPlan),
}

fn illegal(from: impl fmt::Display, event: FlowEvent) -> AppError {
    AppError::IllegalTransition {
        from: from.to_string(),
        event: event.name().to_string(),
    }
}

/// The state table. Anything not listed is an illegal transition.
pub fn transition(from: FlowStep, event: FlowEvent) -> Result<Transition, AppError> {
    use FlowEvent as E;
    use FlowStep as S;

    let next = match (from, event) {
        (S::Identity, E::IdentitySubmitted) => Transition::Goto(S::Consent),
        (S::Consent, E::ConsentConfirmed) => Transition::Goto(S::Offer1),
        (S::Offer1, E::ApplyNow) => Transition::Submit(SubmitPlan {
            with_social: false,
            with_fiscal: false,
            go_to_kyc: false,
        }),
        (S::Offer1, E::Continue) => Transition::Goto(S::Connections),
        (S::Connections, E::ConnectFacebook) => Transition::Goto(S::Connections),
        (S::Connections, E::ConnectionsCompleted) => Transition::Goto(S::Offer2),
        (S::Offer2, E::ApplyNow) => Transition::Submit(SubmitPlan {
            with_social: true,
            with_fiscal: false,
            go_to_kyc: false,
        }),
        (S::Offer2, E::Continue) => Transition::Goto(S::Fiscal),
        (S::Fiscal, E::FiscalCompleted) => Transition::Goto(S::Offer3),
        (S::Offer3, E::ApplyFinal) => Transition::Submit(SubmitPlan {
            with_social: true,
            with_fiscal: true,
            go_to_kyc: true,
        }),
        (_, E::Back) => match from.previous() {
            Some(previous) => Transition::Goto(previous),
            None => return Err(illegal(from, event)),
        },
        _ => return Err(illegal(from, event)),
    };
    Ok(next)
}

/// What the browser should do after an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "target", rename_all = "snake_case")]
pub enum FlowOutcome {
    Step(FlowStep),
    /// Leave the wizard: an in-app route or the external OAuth page.
    Navigate(String),
}

/// Query parameters the OAuth provider appends on its way back.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedirectParams {
    pub facebook: Option<String>,
    pub fb_token: Option<String>,
    #[serde(rename = "appId")]
    pub app_id: Option<String>,
    pub fb_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfferReveal {
    pub stage: OfferStage,
    pub amount: u64,
    pub previous: u64,
    pub amount_label: String,
    pub previous_label: String,
    pub conditions: Conditions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressItem {
    pub step: FlowStep,
    pub label: String,
    pub completed: bool,
    pub current: bool,
}

/// Everything the browser needs to render the current step.
#[derive(Debug, Clone, Serialize)]
pub struct FlowView {
    pub step: FlowStep,
    pub identity: IdentityData,
    pub google_url: Option<String>,
    pub application_id: Option<String>,
    pub facebook_connected: bool,
    pub connections_consent: bool,
    pub has_fiscal_data: bool,
    pub offers: OfferAmounts,
    pub offer: Option<OfferReveal>,
    pub progress: Vec<ProgressItem>,
    pub error: Option<String>,
    pub field_errors: Vec<FieldError>,
    pub submitted_to: Option<String>,
}

pub struct GamifiedFlow {
    client: FullRevenueClient,
    session: SessionState,
    tracker: Tracker,
    merchant_id: String,
    simulated_delay: Duration,

    step: FlowStep,
    identity: IdentityData,
    fiscal: Option<FiscalData>,
    google_url: Option<String>,
    application_id: Option<String>,
    facebook_token: Option<String>,
    connections_consent: bool,
    offers: OfferAmounts,
    error: Option<String>,
    field_errors: Vec<FieldError>,
    submitted_to: Option<String>,
}

impl GamifiedFlow {
    /// Builds a flow from whatever the session holds. Used for a fresh start,
    /// a reload, and the return leg of the OAuth redirect alike.
    pub fn restore(
        client: FullRevenueClient,
        session: SessionState,
        tracker: Tracker,
        config: &Config,
    ) -> Self {
        let snapshot = session.snapshot();
        session.mark_started(Utc::now().timestamp_millis());

        let step = snapshot.step.unwrap_or(FlowStep::Identity);
        tracing::debug!(
            "Restoring flow at {} (application: {:?})",
            step,
            snapshot.application_id
        );

        Self {
            client,
            session,
            tracker,
            merchant_id: config.merchant_id.clone(),
            simulated_delay: config.simulated_delay(),
            step,
            identity: snapshot.identity.unwrap_or_default(),
            fiscal: snapshot.fiscal,
            google_url: snapshot.google_url,
            application_id: snapshot.application_id,
            facebook_token: snapshot.facebook_token,
            connections_consent: snapshot.connections_consent,
            offers: snapshot.offer_amounts.unwrap_or_default(),
            error: None,
            field_errors: Vec::new(),
            submitted_to: None,
        }
    }

    pub fn step(&self) -> FlowStep {
        self.step
    }

    pub fn application_id(&self) -> Option<&str> {
        self.application_id.as_deref()
    }

    pub fn offer_amounts(&self) -> OfferAmounts {
        self.offers
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn field_errors(&self) -> &[FieldError] {
        &self.field_errors
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    // ---------- operations ----------

    /// identity -> consent. Creates the application on first use.
    pub async fn submit_identity(&mut self, input: IdentityData) -> Result<FlowOutcome, AppError> {
        let result = self.identity_step(input).await;
        self.settle(result)
    }

    /// consent -> offer1. Consent and prequalification run concurrently and
    /// either may fail without blocking the step.
    pub async fn submit_consent(&mut self, form: ConsentForm) -> Result<FlowOutcome, AppError> {
        let result = self.consent_step(form).await;
        self.settle(result)
    }

    /// Early exit from offer1 or offer2.
    pub async fn apply_now(&mut self) -> Result<FlowOutcome, AppError> {
        let result = match self.plan(FlowEvent::ApplyNow) {
            Ok(plan) => self.submit(plan).await,
            Err(e) => Err(e),
        };
        self.settle(result)
    }

    /// offer1 -> connections, offer2 -> fiscal.
    pub fn continue_flow(&mut self) -> Result<FlowOutcome, AppError> {
        let result = self.target(FlowEvent::Continue).map(|target| {
            self.tracker
                .step_completed(&format!("{}_continue", self.step.as_str()));
            self.advance(target)
        });
        self.settle(result)
    }

    pub async fn complete_connections(
        &mut self,
        form: ConnectionsForm,
    ) -> Result<FlowOutcome, AppError> {
        let result = self.connections_step(form).await;
        self.settle(result)
    }

    pub async fn complete_fiscal(&mut self, form: FiscalData) -> Result<FlowOutcome, AppError> {
        let result = self.fiscal_step(form).await;
        self.settle(result)
    }

    /// offer3 exit straight into KYC.
    pub async fn apply_final(&mut self) -> Result<FlowOutcome, AppError> {
        let result = match self.plan(FlowEvent::ApplyFinal) {
            Ok(plan) => self.submit(plan).await,
            Err(e) => Err(e),
        };
        self.settle(result)
    }

    /// Rewinds one step. Never touches the network.
    pub fn back(&mut self) -> Result<FlowOutcome, AppError> {
        let result = self
            .target(FlowEvent::Back)
            .map(|target| self.advance(target));
        self.settle(result)
    }

    /// Persists the flow and returns the OAuth URL to navigate to.
    ///
    /// `google_url` is the Maps URL typed so far on the connections step, kept
    /// so it survives the round-trip.
    pub fn connect_facebook(&mut self, google_url: Option<String>) -> Result<FlowOutcome, AppError> {
        let result = self.oauth_start(google_url);
        self.settle(result)
    }

    /// Return leg of the OAuth redirect. Takes the query parameters by value:
    /// once consumed they are gone and a re-render cannot replay them.
    pub fn resume_after_redirect(&mut self, params: RedirectParams) -> FlowOutcome {
        if let Some(err) = params.fb_error.filter(|e| !e.is_empty()) {
            tracing::warn!("Facebook OAuth returned an error: {}", err);
            self.error = Some(format!("Error al conectar Facebook: {}", err));
            self.field_errors.clear();
            return self.advance(FlowStep::Connections);
        }

        let connected = params.facebook.as_deref() == Some("connected");
        match params.fb_token.filter(|t| !t.is_empty()) {
            Some(token) if connected => {
                if let Some(app_id) = params.app_id.filter(|id| !id.is_empty()) {
                    self.session.set_application_id(&app_id);
                    self.application_id = Some(app_id);
                }
                self.session.set_facebook_token(&token);
                self.facebook_token = Some(token);
                self.error = None;
                tracing::info!("Facebook connected for {:?}", self.application_id);
                self.advance(FlowStep::Connections)
            }
            _ => FlowOutcome::Step(self.step),
        }
    }

    // ---------- views ----------

    pub fn view(&self) -> FlowView {
        FlowView {
            step: self.step,
            identity: self.identity.clone(),
            google_url: self.google_url.clone(),
            application_id: self.application_id.clone(),
            facebook_connected: self.facebook_token.is_some(),
            connections_consent: self.connections_consent,
            has_fiscal_data: self.fiscal.is_some(),
            offers: self.offers,
            offer: self.offer_reveal(),
            progress: self.progress(),
            error: self.error.clone(),
            field_errors: self.field_errors.clone(),
            submitted_to: self.submitted_to.clone(),
        }
    }

    /// The offer card for offer1/2/3, `None` on form steps.
    pub fn offer_reveal(&self) -> Option<OfferReveal> {
        let (stage, amount, previous) = match self.step {
            FlowStep::Offer1 => (OfferStage::Bureau, self.offers.bureau, self.offers.base),
            FlowStep::Offer2 => (OfferStage::Social, self.offers.social, self.offers.bureau),
            FlowStep::Offer3 => (OfferStage::Final, self.offers.fiscal, self.offers.social),
            _ => return None,
        };
        Some(OfferReveal {
            stage,
            amount,
            previous,
            amount_label: format_mxn(amount),
            previous_label: format_mxn(previous),
            conditions: compute_conditions(amount as f64, stage),
        })
    }

    pub fn progress(&self) -> Vec<ProgressItem> {
        let current = self.step.position();
        FlowStep::ALL
            .into_iter()
            .map(|step| ProgressItem {
                step,
                label: self.progress_label(step),
                completed: step.position() < current,
                current: step.position() == current,
            })
            .collect()
    }

    fn progress_label(&self, step: FlowStep) -> String {
        match step {
            FlowStep::Identity => "Negocio".to_string(),
            FlowStep::Consent => "Autorizar".to_string(),
            FlowStep::Offer1 => format_compact(self.offers.bureau),
            FlowStep::Connections => "Digital".to_string(),
            FlowStep::Offer2 => format_compact(self.offers.social),
            FlowStep::Fiscal => "Fiscal".to_string(),
            FlowStep::Offer3 => format_compact(self.offers.fiscal),
        }
    }

    // ---------- internals ----------

    fn check_open(&self, event: FlowEvent) -> Result<(), AppError> {
        if self.submitted_to.is_some() {
            return Err(illegal("submitted", event));
        }
        Ok(())
    }

    fn target(&self, event: FlowEvent) -> Result<FlowStep, AppError> {
        self.check_open(event)?;
        match transition(self.step, event)? {
            Transition::Goto(step) => Ok(step),
            Transition::Submit(_) => Err(illegal(self.step, event)),
        }
    }

    fn plan(&self, event: FlowEvent) -> Result<SubmitPlan, AppError> {
        self.check_open(event)?;
        match transition(self.step, event)? {
            Transition::Submit(plan) => Ok(plan),
            Transition::Goto(_) => Err(illegal(self.step, event)),
        }
    }

    fn advance(&mut self, step: FlowStep) -> FlowOutcome {
        tracing::info!("Flow step {} -> {}", self.step, step);
        self.step = step;
        self.session.set_flow_step(step);
        FlowOutcome::Step(step)
    }

    fn settle<T>(&mut self, result: Result<T, AppError>) -> Result<T, AppError> {
        match &result {
            Ok(_) => {
                self.error = None;
                self.field_errors.clear();
            }
            Err(e) => {
                self.error = Some(inline_message(e));
                self.field_errors = field_details(e);
            }
        }
        result
    }

    async fn ensure_application(&mut self) -> Result<String, AppError> {
        match &self.application_id {
            Some(id) => Ok(id.clone()),
            None => self.create_application().await,
        }
    }

    async fn create_application(&mut self) -> Result<String, AppError> {
        let created = self
            .client
            .create_application(&self.merchant_id)
            .await
            .context(START_FAILED)?;

        self.session.set_application_id(&created.id);
        self.application_id = Some(created.id.clone());
        self.tracker.track(
            TrackingEvent::FormStarted,
            Some(json!({ "application_id": created.id })),
        );
        Ok(created.id)
    }

    async fn identity_step(&mut self, input: IdentityData) -> Result<FlowOutcome, AppError> {
        let target = self.target(FlowEvent::IdentitySubmitted)?;
        let identity = validation::validate_identity(&input)?;
        self.ensure_application().await?;

        self.identity = identity;
        self.session.set_form_data(&self.identity);
        self.tracker.step_completed("identity");
        Ok(self.advance(target))
    }

    async fn consent_step(&mut self, form: ConsentForm) -> Result<FlowOutcome, AppError> {
        let target = self.target(FlowEvent::ConsentConfirmed)?;
        let payload = validation::validate_consent(&form)?;
        let app_id = self.ensure_application().await?;

        let (consent, prequal) = tokio::join!(
            self.client.submit_consent(&app_id, payload),
            self.client.prequalify(&app_id)
        );

        if let Err(e) = consent {
            tracing::warn!("Consent submission failed for {}: {}", app_id, e);
        }
        match prequal {
            Ok(p) => {
                self.offers = OfferAmounts::from(p);
                tracing::info!("Prequalified {}: {:?}", app_id, self.offers);
            }
            Err(e) => {
                tracing::warn!("Prequalification failed for {}, keeping defaults: {}", app_id, e)
            }
        }

        self.session.set_offer_amounts(&self.offers);
        self.tracker.step_completed("consent");
        Ok(self.advance(target))
    }

    async fn connections_step(&mut self, form: ConnectionsForm) -> Result<FlowOutcome, AppError> {
        let target = self.target(FlowEvent::ConnectionsCompleted)?;
        let google_url = validation::validate_connections(&form)?;

        self.tracker.step_completed("connections");
        tokio::time::sleep(self.simulated_delay).await;

        self.google_url = google_url;
        self.connections_consent = form.consent_given;
        self.session
            .set_google_url(self.google_url.as_deref().unwrap_or_default());
        self.session.set_consent_given(form.consent_given);
        Ok(self.advance(target))
    }

    async fn fiscal_step(&mut self, form: FiscalData) -> Result<FlowOutcome, AppError> {
        let target = self.target(FlowEvent::FiscalCompleted)?;
        let fiscal = validation::validate_fiscal(&form)?;

        self.tracker.step_completed("fiscal");
        tokio::time::sleep(self.simulated_delay).await;

        self.session.set_fiscal_data(&fiscal);
        self.fiscal = Some(fiscal);
        Ok(self.advance(target))
    }

    fn oauth_start(&mut self, google_url: Option<String>) -> Result<FlowOutcome, AppError> {
        let target = self.target(FlowEvent::ConnectFacebook)?;
        let app_id = self
            .application_id
            .clone()
            .ok_or_else(|| AppError::validation("facebook", BUSINESS_DATA_FIRST))?;
        let url = self.client.oauth_redirect_url(&app_id)?;

        if let Some(draft) = google_url {
            let draft = draft.trim();
            self.google_url = (!draft.is_empty()).then(|| draft.to_string());
        }
        self.session.set_form_data(&self.identity);
        self.session
            .set_google_url(self.google_url.as_deref().unwrap_or_default());
        self.advance(target);

        tracing::info!("Redirecting application {} to Facebook OAuth", app_id);
        Ok(FlowOutcome::Navigate(url))
    }

    fn merged_form_data(&self, plan: SubmitPlan) -> ApplicationFormData {
        let fiscal = self.fiscal.as_ref().filter(|_| plan.with_fiscal);
        let token = self.facebook_token.clone().filter(|_| plan.with_social);

        ApplicationFormData {
            legal_name: self.identity.legal_name.clone(),
            // Fiscal-step credentials override any given on the identity step.
            tax_id: fiscal
                .map(|f| f.tax_id.clone())
                .or_else(|| self.identity.tax_id.clone()),
            ciec: fiscal
                .map(|f| f.ciec.clone())
                .or_else(|| self.identity.ciec.clone()),
            address: self.identity.address.clone(),
            phone: self.identity.phone.clone(),
            email: self.identity.email.clone(),
            google_business_url: self.google_url.clone().filter(|_| plan.with_social),
            facebook_access_token: token.clone(),
            instagram_access_token: token,
            consent_given: true,
        }
    }

    /// Submits the merged snapshot. A 404 means the stored application is
    /// gone: a fresh one is created and the same payload is sent once more.
    async fn submit(&mut self, plan: SubmitPlan) -> Result<FlowOutcome, AppError> {
        if !self.identity.has_required_fields() {
            return Err(AppError::validation("form_data", MISSING_BUSINESS_DATA));
        }
        let form_data = self.merged_form_data(plan);

        let mut app_id = self.ensure_application().await?;
        let first = self.client.submit_application(&app_id, &form_data).await;
        if let Err(e) = first {
            if !e.is_not_found() {
                return Err(e);
            }
            tracing::warn!("Application {} not found, recreating and retrying once", app_id);
            app_id = self.create_application().await?;
            self.client.submit_application(&app_id, &form_data).await?;
        }

        self.session.set_offer_amounts(&self.offers);
        self.session.set_approved_at(Utc::now().timestamp_millis());
        self.session.clear_wizard();
        self.tracker.track(
            TrackingEvent::FormSubmitted,
            Some(json!({ "application_id": app_id })),
        );

        let route = if plan.go_to_kyc {
            routes::kyc(&app_id)
        } else {
            routes::status(&app_id)
        };
        tracing::info!("✓ Application {} submitted, continuing at {}", app_id, route);
        self.submitted_to = Some(route.clone());
        Ok(FlowOutcome::Navigate(route))
    }
}
