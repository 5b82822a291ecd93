//! Statistics for the KYC success page.
//!
//! Purely cosmetic. Everything comes from the session timestamps recorded
//! along the way, with fixed fallbacks when a timestamp is missing.

use crate::models::BankAccount;
use crate::offer::format_mxn;
use crate::session::SessionState;
use serde::Serialize;

const DEFAULT_LOAN_AMOUNT: u64 = 75_000;
const DEFAULT_APPLICATION_SECS: u64 = 94;
const DEFAULT_APPROVAL_SECS: u64 = 12;
const MIN_APPLICATION_SECS: u64 = 30;
const MIN_APPROVAL_SECS: u64 = 8;
const PLACEHOLDER_LAST4: &str = "4821";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SuccessSummary {
    pub loan_amount: u64,
    pub loan_label: String,
    /// From flow start to signature.
    pub application_seconds: u64,
    /// From submission to signature.
    pub approval_seconds: u64,
    pub account_last4: String,
}

pub fn success_summary(
    session: &SessionState,
    bank: Option<&BankAccount>,
    now_ms: i64,
) -> SuccessSummary {
    let loan_amount = session
        .offer_amounts()
        .map(|a| a.fiscal)
        .unwrap_or(DEFAULT_LOAN_AMOUNT);
    let until = session.signed_at().unwrap_or(now_ms);

    let application_seconds = session
        .started_at()
        .map(|started| elapsed_secs(started, until).max(MIN_APPLICATION_SECS))
        .unwrap_or(DEFAULT_APPLICATION_SECS);
    let approval_seconds = session
        .approved_at()
        .map(|approved| elapsed_secs(approved, until).max(MIN_APPROVAL_SECS))
        .unwrap_or(DEFAULT_APPROVAL_SECS);

    let account_last4 = bank
        .map(|b| b.clabe.trim().chars().collect::<Vec<_>>())
        .filter(|digits| digits.len() >= 4)
        .map(|digits| digits[digits.len() - 4..].iter().collect())
        .unwrap_or_else(|| PLACEHOLDER_LAST4.to_string());

    SuccessSummary {
        loan_amount,
        loan_label: format_mxn(loan_amount),
        application_seconds,
        approval_seconds,
        account_last4,
    }
}

fn elapsed_secs(from_ms: i64, until_ms: i64) -> u64 {
    let millis = (until_ms - from_ms).max(0) as f64;
    (millis / 1000.0).round() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OfferAmounts;

    #[test]
    fn test_defaults_without_session_data() {
        let summary = success_summary(&SessionState::in_memory(), None, 1_000_000);
        assert_eq!(summary.loan_amount, 75_000);
        assert_eq!(summary.application_seconds, 94);
        assert_eq!(summary.approval_seconds, 12);
        assert_eq!(summary.account_last4, "4821");
    }

    #[test]
    fn test_measures_until_signature() {
        let session = SessionState::in_memory();
        session.mark_started(1_000_000);
        session.set_approved_at(1_100_000);
        session.set_signed_at(1_120_000);
        session.set_offer_amounts(&OfferAmounts {
            base: 50_000,
            bureau: 80_000,
            social: 110_000,
            fiscal: 220_000,
        });

        let summary = success_summary(&session, None, 9_999_999);
        assert_eq!(summary.loan_amount, 220_000);
        assert_eq!(summary.loan_label, "$220,000 MXN");
        assert_eq!(summary.application_seconds, 120);
        assert_eq!(summary.approval_seconds, 20);
    }

    #[test]
    fn test_floors_short_durations() {
        let session = SessionState::in_memory();
        session.mark_started(1_000_000);
        session.set_approved_at(1_000_500);

        let summary = success_summary(&session, None, 1_002_000);
        assert_eq!(summary.application_seconds, 30);
        assert_eq!(summary.approval_seconds, 8);
    }

    #[test]
    fn test_last4_from_clabe() {
        let bank = BankAccount {
            clabe: "012345678901234567".to_string(),
            ..Default::default()
        };
        let summary = success_summary(&SessionState::in_memory(), Some(&bank), 0);
        assert_eq!(summary.account_last4, "4567");
    }
}
