use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

// ============ Backend Models ============

/// Underwriting decision attached to an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    #[default]
    UnderwritingPending,
    Approved,
    Rejected,
    ManualReview,
}

impl DecisionStatus {
    /// Once reached, the backend will not change its conclusion and polling stops.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DecisionStatus::Approved | DecisionStatus::Rejected | DecisionStatus::ManualReview
        )
    }

    /// Manual review is treated like an approval for offer display and KYC entry.
    pub fn offers_credit(self) -> bool {
        matches!(self, DecisionStatus::Approved | DecisionStatus::ManualReview)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DecisionStatus::UnderwritingPending => "UNDERWRITING_PENDING",
            DecisionStatus::Approved => "APPROVED",
            DecisionStatus::Rejected => "REJECTED",
            DecisionStatus::ManualReview => "MANUAL_REVIEW",
        }
    }
}

/// Credit conditions, either from the backend or synthesized for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditOffer {
    /// Approved amount in MXN.
    pub approved_amount: f64,
    /// Monthly rate, e.g. 0.035 = 3.5%.
    pub interest_rate_monthly: f64,
    /// Number of monthly installments.
    pub installments: u32,
    /// Total monthly installment in MXN.
    pub monthly_payment: f64,
    /// Portion withheld from platform sales each month.
    pub withholding_amount: f64,
    /// Portion charged by direct debit when withholding falls short.
    pub direct_debit_amount: f64,
    pub currency: String,
}

/// Per-source signals the underwriting engine collected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionPayload {
    pub reason: String,

    // SAT via Syntage
    pub syntage_monthly_revenue: f64,
    pub syntage_tax_compliance: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syntage_cfdi_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub syntage_tax_regime: Option<String>,

    // Google Places
    pub places_signals_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub places_rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub places_review_count: Option<u32>,

    // Facebook / Instagram
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facebook_fan_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facebook_rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instagram_followers: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instagram_media_count: Option<u64>,

    // Identity verification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twilio_identity_match: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twilio_whatsapp_business: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twilio_sim_swap_detected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twilio_line_type: Option<String>,

    // Credit bureau
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bureau_score: Option<u32>,

    // Platform history
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_gmv_6m: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_tenure_months: Option<u32>,

    pub total_revenue: f64,
    pub threshold_used: f64,
    pub data_sources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub credit_offer: Option<CreditOffer>,
}

/// The central backend entity, referenced by id throughout the flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub merchant_id: String,
    #[serde(default)]
    pub decision_status: DecisionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_payload: Option<DecisionPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Application {
    /// Short human reference shown on status screens.
    pub fn reference(&self) -> String {
        self.id.chars().take(8).collect::<String>().to_uppercase()
    }

    /// String-valued `form_data` entries, used to pre-fill KYC.
    pub fn form_data_strings(&self) -> Map<String, Value> {
        self.form_data
            .as_ref()
            .map(|m| {
                m.iter()
                    .filter(|(_, v)| v.is_string())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateApplicationResponse {
    pub id: String,
    #[serde(default)]
    pub decision_status: DecisionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KycSubmitResponse {
    pub id: String,
    #[serde(default)]
    pub kyc_status: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrequalResponse {
    #[serde(deserialize_with = "amount")]
    pub base_amount: u64,
    #[serde(deserialize_with = "amount")]
    pub bureau_offer: u64,
    #[serde(deserialize_with = "amount")]
    pub social_offer: u64,
    #[serde(deserialize_with = "amount")]
    pub fiscal_offer: u64,
}

/// Consent body. The backend requires all three flags to be literally `true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentPayload {
    pub bureau_consent: bool,
    pub twilio_consent: bool,
    pub data_processing_consent: bool,
}

impl ConsentPayload {
    pub fn granted() -> Self {
        Self {
            bureau_consent: true,
            twilio_consent: true,
            data_processing_consent: true,
        }
    }
}

/// Body for `POST /events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackEventBody {
    pub event_name: String,
    pub merchant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub timestamp: String,
}

/// Error body returned by the backend on non-2xx responses.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
}

// ============ Wizard Models ============

pub const DEFAULT_BASE_AMOUNT: u64 = 50_000;
pub const DEFAULT_BUREAU_OFFER: u64 = 75_000;
pub const DEFAULT_SOCIAL_OFFER: u64 = 100_000;
pub const DEFAULT_FISCAL_OFFER: u64 = 200_000;

/// Credit ceilings unlocked progressively through the flow.
///
/// Taken from the backend as-is: equal or out-of-order values are not clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferAmounts {
    #[serde(deserialize_with = "amount")]
    pub base: u64,
    #[serde(deserialize_with = "amount")]
    pub bureau: u64,
    #[serde(deserialize_with = "amount")]
    pub social: u64,
    #[serde(deserialize_with = "amount")]
    pub fiscal: u64,
}

impl Default for OfferAmounts {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_AMOUNT,
            bureau: DEFAULT_BUREAU_OFFER,
            social: DEFAULT_SOCIAL_OFFER,
            fiscal: DEFAULT_FISCAL_OFFER,
        }
    }
}

impl From<PrequalResponse> for OfferAmounts {
    fn from(p: PrequalResponse) -> Self {
        Self {
            base: p.base_amount,
            bureau: p.bureau_offer,
            social: p.social_offer,
            fiscal: p.fiscal_offer,
        }
    }
}

/// Business identity collected on the first step (persisted as `fr_form_data`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityData {
    #[serde(default)]
    pub legal_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ciec: Option<String>,
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: String,
}

impl IdentityData {
    /// Fields the backend cannot accept a submission without.
    pub fn has_required_fields(&self) -> bool {
        !self.legal_name.trim().is_empty()
            && !self.address.trim().is_empty()
            && !self.email.trim().is_empty()
    }
}

/// RFC, CIEC and SAT consent from the fiscal step (persisted as `fr_fiscal_data`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalData {
    pub tax_id: String,
    pub ciec: String,
    #[serde(default)]
    pub sat_consent: bool,
}

/// Digital presence step: optional Maps URL plus the terms checkbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionsForm {
    #[serde(default)]
    pub google_business_url: Option<String>,
    #[serde(default)]
    pub consent_given: bool,
}

/// The two mandatory authorizations on the consent step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentForm {
    #[serde(default)]
    pub bureau: bool,
    #[serde(default)]
    pub twilio: bool,
}

/// Merged snapshot sent as `form_data` on submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationFormData {
    pub legal_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ciec: Option<String>,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub google_business_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facebook_access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instagram_access_token: Option<String>,
    pub consent_given: bool,
}

// ============ KYC Models ============

pub const MARITAL_STATUSES: [&str; 5] = ["soltero", "casado", "divorciado", "viudo", "union_libre"];
pub const ACCOUNT_TYPES: [&str; 2] = ["debito", "cheques"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalInfo {
    pub first_name: String,
    pub last_name: String,
    /// `YYYY-MM-DD`
    pub birth_date: String,
    /// RFC of the legal representative.
    pub cedula: String,
    pub nationality: String,
    pub marital_status: String,
}

impl PersonalInfo {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub street: String,
    #[serde(default)]
    pub neighborhood: String,
    pub postal_code: String,
    pub city: String,
    pub state: String,
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String {
    "México".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    /// 18-digit interbank account number.
    pub clabe: String,
    pub bank_name: String,
    pub account_type: String,
    pub account_holder: String,
}

/// An uploaded identity document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KycDocuments {
    pub id_front: Option<DocumentFile>,
    pub id_back: Option<DocumentFile>,
    pub proof_of_address: Option<DocumentFile>,
}

/// Everything sent in the final KYC multipart request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KycSubmission {
    pub personal: PersonalInfo,
    pub address: AddressInfo,
    pub bank: BankAccount,
    pub id_front: DocumentFile,
    pub id_back: DocumentFile,
    pub proof_of_address: Option<DocumentFile>,
}

/// Accepts any non-negative JSON number and rounds it to whole pesos.
fn amount<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if !value.is_finite() || value < 0.0 {
        return Err(serde::de::Error::custom(format!(
            "invalid amount: {}",
            value
        )));
    }
    Ok(value.round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decision_status_terminal_set() {
        assert!(!DecisionStatus::UnderwritingPending.is_terminal());
        assert!(DecisionStatus::Approved.is_terminal());
        assert!(DecisionStatus::Rejected.is_terminal());
        assert!(DecisionStatus::ManualReview.is_terminal());
        assert!(DecisionStatus::ManualReview.offers_credit());
        assert!(!DecisionStatus::Rejected.offers_credit());
    }

    #[test]
    fn test_application_parses_minimal_body() {
        let app: Application = serde_json::from_value(json!({
            "id": "abcdef123456",
            "merchant_id": "demo-merchant-001",
            "decision_status": "MANUAL_REVIEW"
        }))
        .unwrap();
        assert_eq!(app.decision_status, DecisionStatus::ManualReview);
        assert_eq!(app.reference(), "ABCDEF12");
        assert!(app.decision_payload.is_none());
    }

    #[test]
    fn test_offer_amounts_serialize_as_integers() {
        let json = serde_json::to_string(&OfferAmounts::default()).unwrap();
        assert_eq!(
            json,
            r#"{"base":50000,"bureau":75000,"social":100000,"fiscal":200000}"#
        );
    }

    #[test]
    fn test_prequal_accepts_float_amounts() {
        let p: PrequalResponse = serde_json::from_value(json!({
            "base_amount": 50000.0,
            "bureau_offer": 80000,
            "social_offer": 110000,
            "fiscal_offer": 220000.4
        }))
        .unwrap();
        assert_eq!(OfferAmounts::from(p).fiscal, 220000);
    }

    #[test]
    fn test_form_data_skips_absent_fields() {
        let data = ApplicationFormData {
            legal_name: "Taquería X".to_string(),
            address: "Av. Reforma 1, CDMX".to_string(),
            email: "a@x.com".to_string(),
            consent_given: true,
            ..Default::default()
        };
        let value = serde_json::to_value(&data).unwrap();
        assert!(value.get("tax_id").is_none());
        assert!(value.get("ciec").is_none());
        assert_eq!(value["consent_given"], json!(true));
    }
}
