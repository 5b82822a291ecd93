//! Préstamo MÁS credit application flow.
//!
//! A gamified pre-qualification wizard, a status page that polls the credit
//! decision, and a six-step KYC wizard, all driven against the Full Revenue
//! backend. The `handlers` module exposes the flows over HTTP for the browser.
//!
//! # Modules
//!
//! - `api_client`: Full Revenue backend client.
//! - `config`: Configuration from the environment.
//! - `errors`: Error types and HTTP mapping.
//! - `handlers`: Backend-for-frontend HTTP handlers.
//! - `models`: Wire and form data types.
//! - `offer`: Credit conditions and status page views.
//! - `poller`: Decision status polling.
//! - `routes`: Browser routes the flows navigate to.
//! - `session`: Tab-scoped session persistence.
//! - `signature`: Contract signature pad and scroll gate.
//! - `summary`: KYC success statistics.
//! - `tracking`: Funnel event tracking.
//! - `validation`: Form validation rules.
//! - `wizard`: Pre-qualification and KYC state machines.

pub mod api_client;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod offer;
pub mod poller;
pub mod routes;
pub mod session;
pub mod signature;
pub mod summary;
pub mod tracking;
pub mod validation;
pub mod wizard;
