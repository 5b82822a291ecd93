//! Illustrative credit conditions shown alongside each offer reveal.
//!
//! None of this is authoritative: the backend decision is the only source of
//! truth for approved amounts and rates.

use crate::models::{Application, CreditOffer, DecisionPayload, DecisionStatus, OfferAmounts};
use crate::routes;
use serde::{Deserialize, Serialize};

pub const INSTALLMENTS: u32 = 12;
pub const CURRENCY: &str = "MXN";

/// Which data the applicant has attested so far. Better data, lower rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferStage {
    Bureau,
    Social,
    Final,
}

impl OfferStage {
    pub fn monthly_rate(self) -> f64 {
        match self {
            OfferStage::Bureau => 0.038,
            OfferStage::Social => 0.034,
            OfferStage::Final => 0.030,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    pub rate: f64,
    pub installments: u32,
    pub monthly_payment: i64,
}

/// Fixed-rate annuity payment for `amount` over 12 months at the stage rate.
pub fn compute_conditions(amount: f64, stage: OfferStage) -> Conditions {
    let rate = stage.monthly_rate();
    Conditions {
        rate,
        installments: INSTALLMENTS,
        monthly_payment: annuity_payment(amount, rate, INSTALLMENTS).round() as i64,
    }
}

pub fn annuity_payment(principal: f64, rate: f64, installments: u32) -> f64 {
    if rate == 0.0 {
        return principal / f64::from(installments);
    }
    principal * rate / (1.0 - (1.0 + rate).powi(-(installments as i32)))
}

// Placeholder business rule pending underwriting confirmation.
const FALLBACK_REVENUE: f64 = 30_000.0;
const FALLBACK_MULTIPLIER: f64 = 4.5;
const FALLBACK_WITHHOLDING_SHARE: f64 = 0.7;

/// Offer to display for an approved decision that carries no `credit_offer`.
pub fn fallback_offer(payload: &DecisionPayload) -> CreditOffer {
    let base = if payload.total_revenue > 0.0 {
        payload.total_revenue
    } else {
        FALLBACK_REVENUE
    };
    let approved = (base * FALLBACK_MULTIPLIER / 1000.0).round() * 1000.0;
    let rate = OfferStage::Social.monthly_rate();
    let monthly = annuity_payment(approved, rate, INSTALLMENTS).round();
    let withholding = (monthly * FALLBACK_WITHHOLDING_SHARE).round();

    CreditOffer {
        approved_amount: approved,
        interest_rate_monthly: rate,
        installments: INSTALLMENTS,
        monthly_payment: monthly,
        withholding_amount: withholding,
        direct_debit_amount: monthly - withholding,
        currency: CURRENCY.to_string(),
    }
}

/// What the status page shows for an application snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StatusView {
    Pending {
        reference: String,
    },
    Rejected {
        reference: String,
    },
    Offer {
        reference: String,
        offer: CreditOffer,
        withholding_pct: u32,
        kyc_route: String,
    },
    /// Approved, but with no decision payload to build an offer from.
    Received {
        reference: String,
    },
}

pub fn status_view(application: &Application) -> StatusView {
    let reference = application.reference();
    match application.decision_status {
        DecisionStatus::UnderwritingPending => StatusView::Pending { reference },
        DecisionStatus::Rejected => StatusView::Rejected { reference },
        DecisionStatus::Approved | DecisionStatus::ManualReview => {
            let offer = application.decision_payload.as_ref().map(|payload| {
                payload
                    .credit_offer
                    .clone()
                    .unwrap_or_else(|| fallback_offer(payload))
            });
            match offer {
                Some(offer) => StatusView::Offer {
                    reference,
                    withholding_pct: withholding_pct(offer.approved_amount),
                    offer,
                    kyc_route: routes::kyc(&application.id),
                },
                None => StatusView::Received { reference },
            }
        }
    }
}

/// Share of each sales settlement withheld for repayment, in percent.
pub fn withholding_pct(approved_amount: f64) -> u32 {
    if approved_amount >= 400_000.0 {
        20
    } else if approved_amount >= 200_000.0 {
        18
    } else {
        15
    }
}

/// Highest ceiling reached, as shown on the KYC confirm step.
pub fn requested_amount(amounts: Option<&OfferAmounts>) -> u64 {
    amounts.map(|a| a.fiscal).unwrap_or(100_000)
}

/// `80000` -> `$80,000 MXN`
pub fn format_mxn(amount: u64) -> String {
    format!("${} {}", group_thousands(amount), CURRENCY)
}

/// `80000` -> `$80k`, `1500000` -> `$1.5M`
pub fn format_compact(amount: u64) -> String {
    if amount >= 1_000_000 {
        format!("${:.1}M", amount as f64 / 1_000_000.0)
    } else if amount >= 1000 {
        format!("${}k", (amount as f64 / 1000.0).round())
    } else {
        format!("${}", amount)
    }
}

fn group_thousands(amount: u64) -> String {
    let digits = amount.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
