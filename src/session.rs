//! Tab-scoped persistence for the application wizards.
//!
//! Wizard code talks to [`SessionState`], a typed view over a fixed set of
//! `fr_*` keys. The storage mechanism behind it is a [`SessionStore`], so a flow
//! can be rebuilt from scratch after a reload or an OAuth round-trip.

use crate::models::{FiscalData, IdentityData, OfferAmounts};
use crate::wizard::FlowStep;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Storage keys. Values must stay byte-compatible with the browser client.
pub mod keys {
    pub const FORM_DATA: &str = "fr_form_data";
    pub const GOOGLE_URL: &str = "fr_google_url";
    pub const FLOW_STEP: &str = "fr_gflow_step";
    pub const APP_ID: &str = "fr_app_id";
    pub const FB_TOKEN: &str = "fr_fb_token";
    pub const FISCAL_DATA: &str = "fr_fiscal_data";
    pub const CONSENT_GIVEN: &str = "fr_consent_given";
    pub const OFFER_AMOUNTS: &str = "fr_offer_amounts";
    pub const STARTED_AT: &str = "fr_started_at";
    pub const APPROVED_AT: &str = "fr_approved_at";
    pub const SIGNED_AT: &str = "fr_signed_at";

    /// Keys removed once an application has been submitted.
    pub const WIZARD: [&str; 7] = [
        APP_ID,
        FORM_DATA,
        GOOGLE_URL,
        FLOW_STEP,
        FB_TOKEN,
        FISCAL_DATA,
        CONSENT_GIVEN,
    ];
}

/// Last-write-wins string key/value storage.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String);
    fn remove(&self, key: &str);
}

/// In-process store, one per browser tab / BFF flow session.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.entries().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) {
        self.entries().remove(key);
    }
}

/// Everything the pre-qualification wizard needs to resume.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WizardSnapshot {
    pub step: Option<FlowStep>,
    pub identity: Option<IdentityData>,
    pub fiscal: Option<FiscalData>,
    pub google_url: Option<String>,
    pub application_id: Option<String>,
    pub facebook_token: Option<String>,
    pub connections_consent: bool,
    pub offer_amounts: Option<OfferAmounts>,
}

/// Typed schema over the session keys.
#[derive(Clone)]
pub struct SessionState {
    store: Arc<dyn SessionStore>,
}

impl SessionState {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemorySessionStore::new()))
    }

    /// Single restoration routine shared by reload and OAuth return.
    pub fn snapshot(&self) -> WizardSnapshot {
        WizardSnapshot {
            step: self.flow_step(),
            identity: self.form_data(),
            fiscal: self.fiscal_data(),
            google_url: self.google_url(),
            application_id: self.application_id(),
            facebook_token: self.facebook_token(),
            connections_consent: self.consent_given(),
            offer_amounts: self.offer_amounts(),
        }
    }

    pub fn flow_step(&self) -> Option<FlowStep> {
        let raw = self.store.get(keys::FLOW_STEP)?;
        match raw.parse() {
            Ok(step) => Some(step),
            Err(_) => {
                tracing::warn!("Ignoring unknown persisted flow step '{}'", raw);
                None
            }
        }
    }

    pub fn set_flow_step(&self, step: FlowStep) {
        self.store.set(keys::FLOW_STEP, step.as_str().to_string());
    }

    pub fn form_data(&self) -> Option<IdentityData> {
        self.get_json(keys::FORM_DATA)
    }

    pub fn set_form_data(&self, data: &IdentityData) {
        self.set_json(keys::FORM_DATA, data);
    }

    pub fn fiscal_data(&self) -> Option<FiscalData> {
        self.get_json(keys::FISCAL_DATA)
    }

    pub fn set_fiscal_data(&self, data: &FiscalData) {
        self.set_json(keys::FISCAL_DATA, data);
    }

    pub fn google_url(&self) -> Option<String> {
        self.get_string(keys::GOOGLE_URL)
    }

    pub fn set_google_url(&self, url: &str) {
        self.store.set(keys::GOOGLE_URL, url.to_string());
    }

    pub fn application_id(&self) -> Option<String> {
        self.get_string(keys::APP_ID)
    }

    pub fn set_application_id(&self, id: &str) {
        self.store.set(keys::APP_ID, id.to_string());
    }

    pub fn facebook_token(&self) -> Option<String> {
        self.get_string(keys::FB_TOKEN)
    }

    pub fn set_facebook_token(&self, token: &str) {
        self.store.set(keys::FB_TOKEN, token.to_string());
    }

    pub fn consent_given(&self) -> bool {
        self.store.get(keys::CONSENT_GIVEN).as_deref() == Some("true")
    }

    pub fn set_consent_given(&self, given: bool) {
        if given {
            self.store.set(keys::CONSENT_GIVEN, "true".to_string());
        } else {
            self.store.remove(keys::CONSENT_GIVEN);
        }
    }

    pub fn offer_amounts(&self) -> Option<OfferAmounts> {
        self.get_json(keys::OFFER_AMOUNTS)
    }

    pub fn set_offer_amounts(&self, amounts: &OfferAmounts) {
        self.set_json(keys::OFFER_AMOUNTS, amounts);
    }

    pub fn started_at(&self) -> Option<i64> {
        self.get_millis(keys::STARTED_AT)
    }

    /// Records the flow start once; later calls keep the first timestamp.
    pub fn mark_started(&self, now_ms: i64) {
        if self.started_at().is_none() {
            self.store.set(keys::STARTED_AT, now_ms.to_string());
        }
    }

    pub fn approved_at(&self) -> Option<i64> {
        self.get_millis(keys::APPROVED_AT)
    }

    pub fn set_approved_at(&self, now_ms: i64) {
        self.store.set(keys::APPROVED_AT, now_ms.to_string());
    }

    pub fn signed_at(&self) -> Option<i64> {
        self.get_millis(keys::SIGNED_AT)
    }

    pub fn set_signed_at(&self, now_ms: i64) {
        self.store.set(keys::SIGNED_AT, now_ms.to_string());
    }

    /// Drops wizard progress. Summary keys (offer amounts, timestamps) survive.
    pub fn clear_wizard(&self) {
        for key in keys::WIZARD {
            self.store.remove(key);
        }
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.store.get(key).filter(|v| !v.is_empty())
    }

    fn get_millis(&self, key: &str) -> Option<i64> {
        self.store
            .get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|v| *v > 0)
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.store.get(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring unreadable session value for {}: {}", key, e);
                None
            }
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.store.set(key, raw),
            Err(e) => tracing::error!("Failed to persist {}: {}", key, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> IdentityData {
        IdentityData {
            legal_name: "Taquería X".to_string(),
            address: "Av. Reforma 1, CDMX".to_string(),
            email: "a@x.com".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_snapshot_round_trip_through_store() {
        let store = Arc::new(MemorySessionStore::new());
        let session = SessionState::new(store.clone());
        session.set_flow_step(FlowStep::Offer2);
        session.set_form_data(&identity());
        session.set_application_id("app-1");
        session.set_google_url("https://maps.app.goo.gl/abc");

        // A fresh view over the same store sees the same state.
        let restored = SessionState::new(store).snapshot();
        assert_eq!(restored.step, Some(FlowStep::Offer2));
        assert_eq!(restored.identity, Some(identity()));
        assert_eq!(restored.application_id.as_deref(), Some("app-1"));
        assert_eq!(
            restored.google_url.as_deref(),
            Some("https://maps.app.goo.gl/abc")
        );
        assert!(restored.fiscal.is_none());
    }

    #[test]
    fn test_corrupt_values_are_ignored() {
        let store = Arc::new(MemorySessionStore::new());
        store.set(keys::FORM_DATA, "{not json".to_string());
        store.set(keys::FLOW_STEP, "offer9".to_string());
        let session = SessionState::new(store);
        assert!(session.form_data().is_none());
        assert!(session.flow_step().is_none());
    }

    #[test]
    fn test_clear_wizard_keeps_summary_keys() {
        let store = Arc::new(MemorySessionStore::new());
        let session = SessionState::new(store.clone());
        session.set_flow_step(FlowStep::Offer3);
        session.set_form_data(&identity());
        session.set_application_id("app-1");
        session.set_facebook_token("tok");
        session.set_consent_given(true);
        session.set_offer_amounts(&OfferAmounts::default());
        session.set_approved_at(1_700_000_000_000);
        session.mark_started(1_699_999_900_000);

        session.clear_wizard();

        assert_eq!(
            store.keys(),
            vec![
                keys::APPROVED_AT.to_string(),
                keys::OFFER_AMOUNTS.to_string(),
                keys::STARTED_AT.to_string(),
            ]
        );
    }

    #[test]
    fn test_mark_started_keeps_first_timestamp() {
        let session = SessionState::in_memory();
        session.mark_started(100);
        session.mark_started(200);
        assert_eq!(session.started_at(), Some(100));
    }

    #[test]
    fn test_flow_step_stored_as_plain_string() {
        let store = Arc::new(MemorySessionStore::new());
        SessionState::new(store.clone()).set_flow_step(FlowStep::Connections);
        assert_eq!(store.get(keys::FLOW_STEP).as_deref(), Some("connections"));
    }
}
