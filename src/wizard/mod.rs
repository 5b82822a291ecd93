//! The two nested application wizards.

pub mod kyc;
pub mod prequal;

pub use kyc::{KycStep, KycWizard};
pub use prequal::{FlowEvent, FlowOutcome, FlowStep, GamifiedFlow, RedirectParams, SubmitPlan};

use crate::errors::{AppError, FieldError};

/// Inline message for a failed operation. A context string, when present,
/// already is the user-facing wording.
pub(crate) fn inline_message(err: &AppError) -> String {
    match err {
        AppError::WithContext { context, .. } => context.clone(),
        other => other.user_message(),
    }
}

pub(crate) fn field_details(err: &AppError) -> Vec<FieldError> {
    match err {
        AppError::Validation(fields) => fields.clone(),
        AppError::Api { details, .. } => details.clone(),
        AppError::WithContext { source, .. } => field_details(source),
        _ => Vec::new(),
    }
}
