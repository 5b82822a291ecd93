//! Best-effort product analytics.
//!
//! [`Tracker::track`] returns nothing and never fails: the request runs on a
//! detached task and any error is logged at debug level and dropped.

use crate::api_client::FullRevenueClient;
use crate::models::TrackEventBody;
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

/// Funnel events emitted by the application flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingEvent {
    BannerViewed,
    BannerClicked,
    ProductPageViewed,
    ContinueClicked,
    FormStarted,
    StepCompleted,
    FormSubmitted,
}

impl TrackingEvent {
    pub const ALL: [TrackingEvent; 7] = [
        TrackingEvent::BannerViewed,
        TrackingEvent::BannerClicked,
        TrackingEvent::ProductPageViewed,
        TrackingEvent::ContinueClicked,
        TrackingEvent::FormStarted,
        TrackingEvent::StepCompleted,
        TrackingEvent::FormSubmitted,
    ];

    /// Looks an event up by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|event| event.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            TrackingEvent::BannerViewed => "full_revenue_banner_viewed",
            TrackingEvent::BannerClicked => "full_revenue_banner_clicked",
            TrackingEvent::ProductPageViewed => "full_revenue_product_page_viewed",
            TrackingEvent::ContinueClicked => "full_revenue_continue_clicked",
            TrackingEvent::FormStarted => "full_revenue_form_started",
            TrackingEvent::StepCompleted => "full_revenue_step_completed",
            TrackingEvent::FormSubmitted => "full_revenue_form_submitted",
        }
    }
}

#[derive(Clone)]
pub struct Tracker {
    client: Option<FullRevenueClient>,
    merchant_id: String,
}

impl Tracker {
    pub fn new(client: FullRevenueClient, merchant_id: impl Into<String>) -> Self {
        Self {
            client: Some(client),
            merchant_id: merchant_id.into(),
        }
    }

    /// A tracker that records nothing.
    pub fn disabled() -> Self {
        Self {
            client: None,
            merchant_id: String::new(),
        }
    }

    /// Fire-and-forget. Must be called from within a tokio runtime.
    pub fn track(&self, event: TrackingEvent, metadata: Option<Value>) {
        let Some(client) = self.client.clone() else {
            return;
        };

        let body = TrackEventBody {
            event_name: event.name().to_string(),
            merchant_id: self.merchant_id.clone(),
            metadata,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };

        tokio::spawn(async move {
            if let Err(e) = client.track_event(&body).await {
                tracing::debug!("Tracking event {} dropped: {}", body.event_name, e);
            }
        });
    }

    pub fn step_completed(&self, step: &str) {
        self.track(TrackingEvent::StepCompleted, Some(json!({ "step": step })));
    }
}
