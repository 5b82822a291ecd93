//! Post-approval KYC wizard: six linear steps, back one step at a time.

use crate::api_client::FullRevenueClient;
use crate::config::Config;
use crate::errors::{AppError, FieldError, ResultExt};
use crate::models::*;
use crate::offer::{
    compute_conditions, format_mxn, requested_amount, withholding_pct, Conditions, OfferStage,
};
use crate::routes;
use crate::session::SessionState;
use crate::signature::{ClientRect, ContractSignature, PointerInput, SignatureStatus};
use crate::summary::{success_summary, SuccessSummary};
use crate::validation;
use crate::wizard::{field_details, inline_message};
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const NOT_APPROVED: &str = "Esta solicitud no está aprobada para completar KYC.";
const APPLICATION_NOT_FOUND: &str = "Solicitud no encontrada.";
const SUBMIT_FAILED: &str = "Error al enviar la solicitud KYC. Intentá de nuevo.";
const MISSING_DOCUMENTS: &str = "Faltan documentos requeridos.";

const PREFILL_FIRST_NAME: &str = "Guillermo";
const PREFILL_LAST_NAME: &str = "Bravo";
const PREFILL_BIRTH_DATE: &str = "1986-05-01";
const PREFILL_NATIONALITY: &str = "Mexicana";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KycStep {
    Personal = 1,
    Address = 2,
    Bank = 3,
    Documents = 4,
    Contract = 5,
    Confirm = 6,
}

impl KycStep {
    pub const TOTAL: u8 = 6;

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn next(self) -> Option<KycStep> {
        match self {
            KycStep::Personal => Some(KycStep::Address),
            KycStep::Address => Some(KycStep::Bank),
            KycStep::Bank => Some(KycStep::Documents),
            KycStep::Documents => Some(KycStep::Contract),
            KycStep::Contract => Some(KycStep::Confirm),
            KycStep::Confirm => None,
        }
    }

    pub fn previous(self) -> Option<KycStep> {
        match self {
            KycStep::Personal => None,
            KycStep::Address => Some(KycStep::Personal),
            KycStep::Bank => Some(KycStep::Address),
            KycStep::Documents => Some(KycStep::Bank),
            KycStep::Contract => Some(KycStep::Documents),
            KycStep::Confirm => Some(KycStep::Contract),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KycStep::Personal => "personal",
            KycStep::Address => "address",
            KycStep::Bank => "bank",
            KycStep::Documents => "documents",
            KycStep::Contract => "contract",
            KycStep::Confirm => "confirm",
        }
    }
}

impl fmt::Display for KycStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kyc step {} ({})", self.number(), self.as_str())
    }
}

/// Upload slots on the documents step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentSlot {
    IdFront,
    IdBack,
    ProofOfAddress,
}

impl FromStr for DocumentSlot {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id_front" => Ok(DocumentSlot::IdFront),
            "id_back" => Ok(DocumentSlot::IdBack),
            "proof_of_address" => Ok(DocumentSlot::ProofOfAddress),
            other => Err(AppError::BadRequest(format!("Unknown document field: {}", other))),
        }
    }
}

/// Values derived from the application's `form_data`.
///
/// The upstream source shares the owner's name and birth date but never the
/// RFC, so `cedula` always starts blank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KycPrefill {
    pub personal: PersonalInfo,
    pub street: Option<String>,
    pub owner_name: String,
    /// Whether the application carried business data at all.
    pub from_application: bool,
}

impl KycPrefill {
    pub fn from_form_data(form_data: &Map<String, Value>) -> Self {
        let text = |key: &str, fallback: &str| {
            form_data
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(fallback)
                .to_string()
        };
        let personal = PersonalInfo {
            first_name: text("owner_first_name", PREFILL_FIRST_NAME),
            last_name: text("owner_last_name", PREFILL_LAST_NAME),
            birth_date: text("birth_date", PREFILL_BIRTH_DATE),
            cedula: String::new(),
            nationality: PREFILL_NATIONALITY.to_string(),
            marital_status: String::new(),
        };
        let owner_name = personal.full_name();

        Self {
            street: form_data
                .get("address")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            owner_name,
            personal,
            from_application: form_data
                .get("legal_name")
                .and_then(Value::as_str)
                .is_some_and(|s| !s.is_empty()),
        }
    }
}

/// Amount and conditions shown on the confirm step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmSummary {
    pub full_name: String,
    pub amount: u64,
    pub amount_label: String,
    pub conditions: Conditions,
    pub withholding_pct: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct KycView {
    pub application_id: String,
    pub step: KycStep,
    pub step_number: u8,
    pub total_steps: u8,
    pub prefill: KycPrefill,
    pub personal: PersonalInfo,
    pub address: AddressInfo,
    pub bank: BankAccount,
    pub documents: DocumentStatus,
    pub signature: SignatureStatus,
    pub authorized: bool,
    pub confirm: Option<ConfirmSummary>,
    pub error: Option<String>,
    pub field_errors: Vec<FieldError>,
    pub submitted_to: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DocumentStatus {
    pub id_front: bool,
    pub id_back: bool,
    pub proof_of_address: bool,
}

pub struct KycWizard {
    client: FullRevenueClient,
    session: SessionState,
    application_id: String,
    signature_delay: Duration,

    step: KycStep,
    prefill: KycPrefill,
    personal: Option<PersonalInfo>,
    address: Option<AddressInfo>,
    bank: Option<BankAccount>,
    documents: KycDocuments,
    contract: ContractSignature,
    authorized: bool,
    error: Option<String>,
    field_errors: Vec<FieldError>,
    submitted_to: Option<String>,
}

impl KycWizard {
    /// Entry gate: the application must exist and carry an approval
    /// (or manual review) before any KYC data is collected.
    pub async fn open(
        client: FullRevenueClient,
        session: SessionState,
        application_id: &str,
        config: &Config,
    ) -> Result<Self, AppError> {
        let application = match client.get_application(application_id).await {
            Ok(app) => app,
            Err(e) => {
                tracing::warn!("KYC entry for {} failed: {}", application_id, e);
                return Err(AppError::NotFound(APPLICATION_NOT_FOUND.to_string()));
            }
        };

        if !application.decision_status.offers_credit() {
            tracing::warn!(
                "KYC refused for {}: status {}",
                application_id,
                application.decision_status.as_str()
            );
            return Err(AppError::BadRequest(NOT_APPROVED.to_string()));
        }

        tracing::info!("Opening KYC for {}", application_id);
        Ok(Self::new(client, session, &application, config))
    }

    pub fn new(
        client: FullRevenueClient,
        session: SessionState,
        application: &Application,
        config: &Config,
    ) -> Self {
        Self {
            client,
            session,
            application_id: application.id.clone(),
            signature_delay: config.signature_delay(),
            step: KycStep::Personal,
            prefill: KycPrefill::from_form_data(&application.form_data_strings()),
            personal: None,
            address: None,
            bank: None,
            documents: KycDocuments::default(),
            contract: ContractSignature::default(),
            authorized: false,
            error: None,
            field_errors: Vec::new(),
            submitted_to: None,
        }
    }

    pub fn step(&self) -> KycStep {
        self.step
    }

    pub fn application_id(&self) -> &str {
        &self.application_id
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    // ---------- form defaults ----------

    pub fn personal_defaults(&self) -> PersonalInfo {
        self.personal
            .clone()
            .unwrap_or_else(|| self.prefill.personal.clone())
    }

    pub fn address_defaults(&self) -> AddressInfo {
        self.address.clone().unwrap_or_else(|| AddressInfo {
            street: self.prefill.street.clone().unwrap_or_default(),
            country: "México".to_string(),
            ..Default::default()
        })
    }

    /// Account holder defaults to the representative, not the business name.
    pub fn bank_defaults(&self) -> BankAccount {
        self.bank.clone().unwrap_or_else(|| BankAccount {
            account_holder: self
                .personal
                .as_ref()
                .map(PersonalInfo::full_name)
                .unwrap_or_else(|| self.prefill.owner_name.clone()),
            ..Default::default()
        })
    }

    // ---------- steps 1-3 ----------

    pub fn submit_personal(&mut self, input: PersonalInfo) -> Result<KycStep, AppError> {
        let result = self.expect_step(KycStep::Personal, "personal").and_then(|_| {
            let personal = validation::validate_personal(&input)?;
            self.personal = Some(personal);
            Ok(self.advance())
        });
        self.settle(result)
    }

    pub fn submit_address(&mut self, input: AddressInfo) -> Result<KycStep, AppError> {
        let result = self.expect_step(KycStep::Address, "address").and_then(|_| {
            let address = validation::validate_address(&input)?;
            self.address = Some(address);
            Ok(self.advance())
        });
        self.settle(result)
    }

    pub fn submit_bank(&mut self, input: BankAccount) -> Result<KycStep, AppError> {
        let result = self.expect_step(KycStep::Bank, "bank").and_then(|_| {
            let bank = validation::validate_bank(&input)?;
            self.bank = Some(bank);
            Ok(self.advance())
        });
        self.settle(result)
    }

    // ---------- step 4 ----------

    pub fn attach_document(&mut self, slot: DocumentSlot, file: DocumentFile) -> Result<(), AppError> {
        let result = self.expect_step(KycStep::Documents, "attach_document").map(|_| {
            tracing::debug!("Attached {} ({} bytes)", file.file_name, file.bytes.len());
            match slot {
                DocumentSlot::IdFront => self.documents.id_front = Some(file),
                DocumentSlot::IdBack => self.documents.id_back = Some(file),
                DocumentSlot::ProofOfAddress => self.documents.proof_of_address = Some(file),
            }
        });
        self.settle(result)
    }

    /// Blocks until both sides of the INE are attached.
    pub fn submit_documents(&mut self) -> Result<KycStep, AppError> {
        let result = self.expect_step(KycStep::Documents, "documents").and_then(|_| {
            validation::validate_documents(&self.documents)?;
            Ok(self.advance())
        });
        self.settle(result)
    }

    // ---------- step 5 ----------

    /// Contract inputs are only accepted while the contract step is showing.
    pub fn contract_scrolled(
        &mut self,
        scroll_top: f64,
        client_height: f64,
        scroll_height: f64,
    ) -> Result<bool, AppError> {
        self.expect_step(KycStep::Contract, "scroll")?;
        Ok(self
            .contract
            .scroll
            .on_scroll(scroll_top, client_height, scroll_height))
    }

    pub fn draw_stroke(&mut self, rect: &ClientRect, inputs: &[PointerInput]) -> Result<(), AppError> {
        self.expect_step(KycStep::Contract, "stroke")?;
        self.contract.pad.draw_stroke(rect, inputs);
        Ok(())
    }

    pub fn clear_signature(&mut self) -> Result<(), AppError> {
        self.expect_step(KycStep::Contract, "clear_signature")?;
        self.contract.pad.clear();
        Ok(())
    }

    pub fn set_agreed(&mut self, agreed: bool) -> Result<(), AppError> {
        self.expect_step(KycStep::Contract, "agree")?;
        self.contract.set_agreed(agreed);
        Ok(())
    }

    pub fn signature_status(&self) -> SignatureStatus {
        self.contract.status()
    }

    pub async fn sign(&mut self) -> Result<KycStep, AppError> {
        let result = match self.expect_step(KycStep::Contract, "sign") {
            Ok(()) => self
                .contract
                .finalize(&self.session, self.signature_delay)
                .await
                .map(|_| self.advance()),
            Err(e) => Err(e),
        };
        self.settle(result)
    }

    // ---------- step 6 ----------

    pub fn set_authorized(&mut self, authorized: bool) -> Result<(), AppError> {
        self.expect_step(KycStep::Confirm, "authorize")?;
        self.authorized = authorized;
        if authorized {
            self.field_errors.retain(|f| f.field != "authorized");
        }
        Ok(())
    }

    pub fn confirm_summary(&self) -> ConfirmSummary {
        let amount = requested_amount(self.session.offer_amounts().as_ref());
        ConfirmSummary {
            full_name: self.personal_defaults().full_name(),
            amount,
            amount_label: format_mxn(amount),
            conditions: compute_conditions(amount as f64, OfferStage::Social),
            withholding_pct: withholding_pct(amount as f64),
        }
    }

    /// Sends everything as one multipart request. On failure every entered
    /// value stays in place so the applicant can simply retry.
    pub async fn confirm(&mut self) -> Result<String, AppError> {
        let result = self.submit().await;
        self.settle(result)
    }

    pub fn back(&mut self) -> Result<KycStep, AppError> {
        let result = match self.step.previous() {
            Some(previous) if self.submitted_to.is_none() => {
                tracing::info!("KYC {} -> {}", self.step, previous);
                self.step = previous;
                Ok(previous)
            }
            _ => Err(self.illegal("back")),
        };
        self.settle(result)
    }

    pub fn success_summary(&self) -> SuccessSummary {
        success_summary(
            &self.session,
            self.bank.as_ref(),
            Utc::now().timestamp_millis(),
        )
    }

    pub fn view(&self) -> KycView {
        KycView {
            application_id: self.application_id.clone(),
            step: self.step,
            step_number: self.step.number(),
            total_steps: KycStep::TOTAL,
            prefill: self.prefill.clone(),
            personal: self.personal_defaults(),
            address: self.address_defaults(),
            bank: self.bank_defaults(),
            documents: DocumentStatus {
                id_front: self.documents.id_front.is_some(),
                id_back: self.documents.id_back.is_some(),
                proof_of_address: self.documents.proof_of_address.is_some(),
            },
            signature: self.contract.status(),
            authorized: self.authorized,
            confirm: (self.step == KycStep::Confirm).then(|| self.confirm_summary()),
            error: self.error.clone(),
            field_errors: self.field_errors.clone(),
            submitted_to: self.submitted_to.clone(),
        }
    }

    // ---------- internals ----------

    fn illegal(&self, event: &str) -> AppError {
        let from = match &self.submitted_to {
            Some(_) => "submitted".to_string(),
            None => self.step.to_string(),
        };
        AppError::IllegalTransition {
            from,
            event: event.to_string(),
        }
    }

    fn expect_step(&self, expected: KycStep, event: &str) -> Result<(), AppError> {
        if self.step == expected && self.submitted_to.is_none() {
            Ok(())
        } else {
            Err(self.illegal(event))
        }
    }

    fn advance(&mut self) -> KycStep {
        if let Some(next) = self.step.next() {
            tracing::info!("KYC {} -> {}", self.step, next);
            self.step = next;
        }
        self.step
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

    async fn submit(&mut self) -> Result<String, AppError> {
        self.expect_step(KycStep::Confirm, "confirm")?;
        if !self.authorized {
            return Err(AppError::validation("authorized", "Debés autorizar para enviar"));
        }

        let (Some(personal), Some(address), Some(bank)) =
            (self.personal.clone(), self.address.clone(), self.bank.clone())
        else {
            return Err(self.illegal("confirm"));
        };
        let (Some(id_front), Some(id_back)) =
            (self.documents.id_front.clone(), self.documents.id_back.clone())
        else {
            return Err(AppError::validation("documents", MISSING_DOCUMENTS));
        };

        let submission = KycSubmission {
            personal,
            address,
            bank,
            id_front,
            id_back,
            proof_of_address: self.documents.proof_of_address.clone(),
        };

        self.client
            .submit_kyc(&self.application_id, &submission)
            .await
            .context(SUBMIT_FAILED)?;

        self.session.clear_wizard();
        let route = routes::kyc_success(&self.application_id);
        tracing::info!("✓ KYC complete for {}", self.application_id);
        self.submitted_to = Some(route.clone());
        Ok(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn application(form_data: Value) -> Application {
        serde_json::from_value(json!({
            "id": "app-1",
            "merchant_id": "demo-merchant-001",
            "decision_status": "APPROVED",
            "form_data": form_data,
        }))
        .unwrap()
    }

    fn wizard(form_data: Value) -> KycWizard {
        let client = FullRevenueClient::new("http://127.0.0.1:9").unwrap();
        KycWizard::new(
            client,
            SessionState::in_memory(),
            &application(form_data),
            &Config::for_base_url("http://127.0.0.1:9"),
        )
    }

    fn doc(name: &str) -> DocumentFile {
        DocumentFile {
            file_name: name.to_string(),
            content_type: "image/jpeg".to_string(),
            bytes: vec![0xFF, 0xD8, 0xFF],
        }
    }

    fn personal() -> PersonalInfo {
        PersonalInfo {
            first_name: "Ana".to_string(),
            last_name: "López".to_string(),
            birth_date: "1990-02-03".to_string(),
            cedula: "LOPA900203AB1".to_string(),
            nationality: "Mexicana".to_string(),
            marital_status: "soltero".to_string(),
        }
    }

    fn address() -> AddressInfo {
        AddressInfo {
            street: "Av. Reforma 1".to_string(),
            neighborhood: String::new(),
            postal_code: "06600".to_string(),
            city: "CDMX".to_string(),
            state: "Ciudad de México".to_string(),
            country: "México".to_string(),
        }
    }

    fn bank() -> BankAccount {
        BankAccount {
            clabe: "012345678901234567".to_string(),
            bank_name: "BBVA".to_string(),
            account_type: "debito".to_string(),
            account_holder: "Ana López".to_string(),
        }
    }

    #[test]
    fn test_prefill_uses_form_data_and_fallbacks() {
        let w = wizard(json!({
            "legal_name": "Taquería X",
            "address": "Av. Reforma 1, CDMX",
            "owner_first_name": "Ana",
        }));
        let p = w.personal_defaults();
        assert_eq!(p.first_name, "Ana");
        assert_eq!(p.last_name, "Bravo");
        assert_eq!(p.birth_date, "1986-05-01");
        assert_eq!(p.nationality, "Mexicana");
        assert!(p.cedula.is_empty());
        assert_eq!(w.address_defaults().street, "Av. Reforma 1, CDMX");
        assert_eq!(w.bank_defaults().account_holder, "Ana Bravo");
        assert!(w.view().prefill.from_application);
    }

    #[test]
    fn test_account_holder_follows_captured_personal_data() {
        let mut w = wizard(json!({}));
        w.submit_personal(personal()).unwrap();
        assert_eq!(w.bank_defaults().account_holder, "Ana López");
    }

    #[test]
    fn test_linear_steps_and_back() {
        let mut w = wizard(json!({}));
        assert!(w.submit_address(address()).is_err());
        assert_eq!(w.submit_personal(personal()).unwrap(), KycStep::Address);
        assert_eq!(w.back().unwrap(), KycStep::Personal);
        assert!(w.back().is_err());
        w.submit_personal(personal()).unwrap();
        w.submit_address(address()).unwrap();
        assert_eq!(w.submit_bank(bank()).unwrap(), KycStep::Documents);
    }

    #[test]
    fn test_documents_gate() {
        let mut w = wizard(json!({}));
        w.submit_personal(personal()).unwrap();
        w.submit_address(address()).unwrap();
        w.submit_bank(bank()).unwrap();

        w.attach_document(DocumentSlot::IdFront, doc("front.jpg")).unwrap();
        assert!(w.submit_documents().is_err());
        assert_eq!(w.view().field_errors[0].field, "id_back");
        assert_eq!(w.step(), KycStep::Documents);

        w.attach_document(DocumentSlot::IdBack, doc("back.jpg")).unwrap();
        assert_eq!(w.submit_documents().unwrap(), KycStep::Contract);
        assert!(w.view().field_errors.is_empty());
    }

    #[tokio::test]
    async fn test_unauthorized_confirm_makes_no_request() {
        let mut w = wizard(json!({}));
        w.submit_personal(personal()).unwrap();
        w.submit_address(address()).unwrap();
        w.submit_bank(bank()).unwrap();
        w.attach_document(DocumentSlot::IdFront, doc("front.jpg")).unwrap();
        w.attach_document(DocumentSlot::IdBack, doc("back.jpg")).unwrap();
        w.submit_documents().unwrap();

        let rect = ClientRect {
            left: 0.0,
            top: 0.0,
            width: 600.0,
            height: 140.0,
        };
        w.contract_scrolled(1000.0, 400.0, 1400.0).unwrap();
        w.draw_stroke(
            &rect,
            &[
                PointerInput::Mouse {
                    client_x: 10.0,
                    client_y: 10.0,
                },
                PointerInput::Mouse {
                    client_x: 50.0,
                    client_y: 30.0,
                },
            ],
        )
        .unwrap();
        w.set_agreed(true).unwrap();
        assert_eq!(w.sign().await.unwrap(), KycStep::Confirm);

        let err = w.confirm().await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(w.last_error(), Some("Debés autorizar para enviar"));
    }

    #[test]
    fn test_contract_inputs_only_on_contract_step() {
        let mut w = wizard(json!({}));
        let rect = ClientRect {
            left: 0.0,
            top: 0.0,
            width: 600.0,
            height: 140.0,
        };
        assert!(matches!(
            w.set_agreed(true),
            Err(AppError::IllegalTransition { .. })
        ));
        assert!(w.contract_scrolled(1000.0, 400.0, 1400.0).is_err());
        assert!(w.draw_stroke(&rect, &[]).is_err());
        assert!(w.clear_signature().is_err());
        assert!(w.set_authorized(true).is_err());
        assert!(!w.signature_status().agreed);

        w.submit_personal(personal()).unwrap();
        w.submit_address(address()).unwrap();
        w.submit_bank(bank()).unwrap();
        w.attach_document(DocumentSlot::IdFront, doc("front.jpg")).unwrap();
        w.attach_document(DocumentSlot::IdBack, doc("back.jpg")).unwrap();
        w.submit_documents().unwrap();

        assert!(w.set_agreed(true).is_ok());
        assert!(w.clear_signature().is_ok());
        assert!(w.set_authorized(true).is_err());
    }

    #[test]
    fn test_confirm_summary_defaults_to_social_rate() {
        let w = wizard(json!({}));
        let summary = w.confirm_summary();
        assert_eq!(summary.amount, 100_000);
        assert_eq!(summary.conditions.rate, 0.034);
        assert_eq!(summary.withholding_pct, 15);
    }
}
