use crate::errors::{AppError, FieldError};
use crate::models::*;
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Client for the Full Revenue applications backend.
#[derive(Clone)]
pub struct FullRevenueClient {
    client: reqwest::Client,
    base_url: String,
}

impl FullRevenueClient {
    /// Creates a new `FullRevenueClient`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - The backend base URL, without trailing slash.
    pub fn new(base_url: impl Into<String>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder().build().map_err(|e| {
            AppError::ExternalApiError(format!("Failed to create Full Revenue client: {}", e))
        })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates a new application for a merchant.
    ///
    /// # Returns
    ///
    /// * `Result<CreateApplicationResponse, AppError>` - The new id and its initial decision status.
    pub async fn create_application(
        &self,
        merchant_id: &str,
    ) -> Result<CreateApplicationResponse, AppError> {
        let url = format!("{}/full-revenue/applications", self.base_url);
        tracing::info!("Creating application for merchant {}", merchant_id);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "merchant_id": merchant_id }))
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Create request failed: {}", e)))?;

        let created: CreateApplicationResponse = read_json(response, "Request failed").await?;
        tracing::info!("✓ Application created: {}", created.id);
        Ok(created)
    }

    /// Submits the merged form snapshot for underwriting.
    pub async fn submit_application(
        &self,
        id: &str,
        form_data: &ApplicationFormData,
    ) -> Result<SubmitResponse, AppError> {
        let url = format!("{}/full-revenue/applications/{}/submit", self.base_url, id);
        tracing::info!("Submitting application {}", id);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "form_data": form_data }))
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Submit request failed: {}", e)))?;

        let submitted: SubmitResponse = read_json(response, "Request failed").await?;
        tracing::info!("✓ Application {} submitted: {}", id, submitted.status);
        Ok(submitted)
    }

    /// Fetches the full application, including any decision.
    pub async fn get_application(&self, id: &str) -> Result<Application, AppError> {
        let url = format!("{}/full-revenue/applications/{}", self.base_url, id);
        tracing::debug!("Fetching application {}", id);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Status request failed: {}", e)))?;

        read_json(response, "Request failed").await
    }

    /// Fetches the prequalification ceilings for an application.
    pub async fn prequalify(&self, id: &str) -> Result<PrequalResponse, AppError> {
        let url = format!("{}/full-revenue/applications/{}/prequal", self.base_url, id);
        tracing::info!("Prequalifying application {}", id);

        let response = self.client.get(&url).send().await.map_err(|e| {
            AppError::ExternalApiError(format!("Prequalification request failed: {}", e))
        })?;

        read_json(response, "Request failed").await
    }

    /// Records bureau, identity and data-processing consent.
    pub async fn submit_consent(&self, id: &str, consent: ConsentPayload) -> Result<(), AppError> {
        let url = format!("{}/full-revenue/applications/{}/consent", self.base_url, id);
        tracing::info!("Submitting consent for application {}", id);

        let response = self
            .client
            .post(&url)
            .json(&consent)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Consent request failed: {}", e)))?;

        read_empty(response, "Request failed").await
    }

    /// Uploads KYC data and identity documents as a multipart form.
    pub async fn submit_kyc(
        &self,
        id: &str,
        submission: &KycSubmission,
    ) -> Result<KycSubmitResponse, AppError> {
        let url = format!("{}/full-revenue/applications/{}/kyc", self.base_url, id);
        tracing::info!("Submitting KYC for application {}", id);

        let mut form = Form::new()
            .text("personal", serde_json::to_string(&submission.personal)?)
            .text("address", serde_json::to_string(&submission.address)?)
            .text("bank", serde_json::to_string(&submission.bank)?)
            .part("id_front", file_part(&submission.id_front)?)
            .part("id_back", file_part(&submission.id_back)?);
        if let Some(proof) = &submission.proof_of_address {
            form = form.part("proof_of_address", file_part(proof)?);
        }

        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("KYC request failed: {}", e)))?;

        let submitted: KycSubmitResponse = read_json(response, "KYC submission failed").await?;
        tracing::info!("✓ KYC submitted for {}: {}", id, submitted.kyc_status);
        Ok(submitted)
    }

    /// Posts an instrumentation event. Callers are expected to ignore failures.
    pub async fn track_event(&self, body: &TrackEventBody) -> Result<(), AppError> {
        let url = format!("{}/events", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Event request failed: {}", e)))?;

        read_empty(response, "Request failed").await
    }

    /// External OAuth entry point for connecting Facebook / Instagram.
    pub fn oauth_redirect_url(&self, application_id: &str) -> Result<String, AppError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/oauth/facebook/redirect", self.base_url),
            &[("applicationId", application_id)],
        )
        .map_err(|e| AppError::InternalError(format!("Failed to build OAuth URL: {}", e)))?;
        Ok(url.to_string())
    }
}

fn file_part(file: &DocumentFile) -> Result<Part, AppError> {
    Part::bytes(file.bytes.clone())
        .file_name(file.file_name.clone())
        .mime_str(&file.content_type)
        .map_err(|e| AppError::BadRequest(format!("Invalid content type for {}: {}", file.file_name, e)))
}

async fn read_json<T: DeserializeOwned>(response: Response, fallback: &str) -> Result<T, AppError> {
    let response = check_status(response, fallback).await?;
    response
        .json()
        .await
        .map_err(|e| AppError::ExternalApiError(format!("Failed to parse response: {}", e)))
}

async fn read_empty(response: Response, fallback: &str) -> Result<(), AppError> {
    check_status(response, fallback).await.map(|_| ())
}

/// Turns a non-2xx response into `AppError::Api`, reading `{error, details}` when present.
async fn check_status(response: Response, fallback: &str) -> Result<Response, AppError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: ApiErrorBody = response.json().await.unwrap_or_default();
    let message = body.error.unwrap_or_else(|| fallback.to_string());
    let details = body.details.map(parse_details).unwrap_or_default();

    if status == StatusCode::NOT_FOUND {
        tracing::warn!("Backend returned 404: {}", message);
    } else {
        tracing::error!("Backend returned {}: {}", status, message);
    }

    Err(AppError::Api {
        status: status.as_u16(),
        message,
        details,
    })
}

fn parse_details(details: Value) -> Vec<FieldError> {
    match details {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| {
                let field = item.get("field")?.as_str()?.to_string();
                let message = item
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or_default()
                    .to_string();
                Some(FieldError { field, message })
            })
            .collect(),
        _ => Vec::new(),
    }
}
