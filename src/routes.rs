//! Browser navigation targets handed back after a wizard exit.

pub fn status(application_id: &str) -> String {
    format!("/full-revenue/status/{}", application_id)
}

pub fn kyc(application_id: &str) -> String {
    format!("/full-revenue/kyc/{}", application_id)
}

pub fn kyc_success(application_id: &str) -> String {
    format!("/full-revenue/kyc/{}/success", application_id)
}

pub const APPLY: &str = "/full-revenue/apply";
