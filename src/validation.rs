//! Field rules for every wizard form.
//!
//! Validators return the normalized value on success, or every failing field
//! at once as `AppError::Validation`. They never touch the network.

use crate::errors::{AppError, FieldError};
use crate::models::*;
use regex::Regex;
use std::sync::OnceLock;

static EMAIL: OnceLock<Regex> = OnceLock::new();
static RFC: OnceLock<Regex> = OnceLock::new();
static PHONE_NOISE: OnceLock<Regex> = OnceLock::new();
static ISO_DATE: OnceLock<Regex> = OnceLock::new();

fn compiled<'a>(cell: &'a OnceLock<Regex>, pattern: &str) -> &'a Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static pattern compiles"))
}

pub fn is_valid_email(email: &str) -> bool {
    compiled(
        &EMAIL,
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*\.[A-Za-z]{2,}$",
    )
    .is_match(email)
}

/// Mexican tax id: 3-4 letters, 6-digit date, 3-char homoclave.
pub fn is_valid_rfc(rfc: &str) -> bool {
    let len = rfc.chars().count();
    (12..=13).contains(&len)
        && compiled(&RFC, r"(?i)^[A-ZÑ&]{3,4}[0-9]{6}[A-Z0-9]{3}$").is_match(rfc)
}

/// Strips spaces, dashes, parentheses, dots and `+`.
pub fn normalize_phone(raw: &str) -> String {
    compiled(&PHONE_NOISE, r"[\s\-().+]")
        .replace_all(raw, "")
        .into_owned()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn finish<T>(errors: Vec<FieldError>, value: T) -> Result<T, AppError> {
    if errors.is_empty() {
        Ok(value)
    } else {
        Err(AppError::Validation(errors))
    }
}

fn check_ciec(ciec: &str, errors: &mut Vec<FieldError>) {
    let len = char_len(ciec);
    if len < 8 {
        errors.push(FieldError::new(
            "ciec",
            "La Clave CIEC debe tener al menos 8 caracteres",
        ));
    } else if len > 20 {
        errors.push(FieldError::new("ciec", "La Clave CIEC es demasiado larga"));
    }
}

fn check_rfc(field: &str, rfc: &str, errors: &mut Vec<FieldError>) {
    let len = char_len(rfc);
    if !(12..=13).contains(&len) {
        errors.push(FieldError::new(field, "El RFC debe tener 12 o 13 caracteres"));
    } else if !is_valid_rfc(rfc) {
        errors.push(FieldError::new(
            field,
            "Formato de RFC inválido (ej: XAXX010101000)",
        ));
    }
}

/// Business identity (first wizard step).
pub fn validate_identity(input: &IdentityData) -> Result<IdentityData, AppError> {
    let mut errors = Vec::new();

    let legal_name = input.legal_name.trim().to_string();
    if char_len(&legal_name) < 2 {
        errors.push(FieldError::new(
            "legal_name",
            "El nombre legal debe tener al menos 2 caracteres",
        ));
    } else if char_len(&legal_name) > 200 {
        errors.push(FieldError::new("legal_name", "El nombre legal es demasiado largo"));
    }

    let address = input.address.trim().to_string();
    if char_len(&address) < 5 {
        errors.push(FieldError::new("address", "La dirección es demasiado corta"));
    } else if char_len(&address) > 500 {
        errors.push(FieldError::new("address", "La dirección es demasiado larga"));
    }

    let email = input.email.trim().to_string();
    if !is_valid_email(&email) {
        errors.push(FieldError::new("email", "Email inválido"));
    }

    let phone = match non_empty(&input.phone) {
        Some(raw) => {
            let len = char_len(&raw);
            let digits = normalize_phone(&raw);
            if len < 7 {
                errors.push(FieldError::new("phone", "El teléfono es demasiado corto"));
            } else if len > 25 {
                errors.push(FieldError::new("phone", "El teléfono es demasiado largo"));
            } else if !(7..=15).contains(&digits.len())
                || !digits.chars().all(|c| c.is_ascii_digit())
            {
                errors.push(FieldError::new(
                    "phone",
                    "Ingresá solo números (podés usar guiones o espacios)",
                ));
            }
            Some(digits)
        }
        None => None,
    };

    let tax_id = non_empty(&input.tax_id);
    if let Some(rfc) = &tax_id {
        check_rfc("tax_id", rfc, &mut errors);
    }

    let ciec = non_empty(&input.ciec);
    if let Some(ciec) = &ciec {
        check_ciec(ciec, &mut errors);
    }

    finish(
        errors,
        IdentityData {
            legal_name,
            tax_id,
            ciec,
            address,
            phone,
            email,
        },
    )
}

/// RFC + CIEC + SAT authorization.
pub fn validate_fiscal(input: &FiscalData) -> Result<FiscalData, AppError> {
    let mut errors = Vec::new();
    let tax_id = input.tax_id.trim().to_string();
    let ciec = input.ciec.to_string();

    check_rfc("tax_id", &tax_id, &mut errors);
    check_ciec(&ciec, &mut errors);
    if !input.sat_consent {
        errors.push(FieldError::new(
            "sat_consent",
            "Debés autorizar la consulta de datos fiscales",
        ));
    }

    finish(
        errors,
        FiscalData {
            tax_id,
            ciec,
            sat_consent: true,
        },
    )
}

/// Returns the Maps URL to keep, if any.
pub fn validate_connections(input: &ConnectionsForm) -> Result<Option<String>, AppError> {
    let mut errors = Vec::new();

    let url = non_empty(&input.google_business_url);
    if let Some(raw) = &url {
        let absolute = url::Url::parse(raw)
            .map(|u| u.has_host())
            .unwrap_or(false);
        if !absolute {
            errors.push(FieldError::new(
                "google_business_url",
                "Ingresá una URL válida",
            ));
        }
    }
    if !input.consent_given {
        errors.push(FieldError::new(
            "consent_given",
            "Debés aceptar los términos para continuar",
        ));
    }

    finish(errors, url)
}

pub fn validate_consent(input: &ConsentForm) -> Result<ConsentPayload, AppError> {
    let mut errors = Vec::new();
    if !input.bureau {
        errors.push(FieldError::new(
            "bureau",
            "Autorizá la consulta al Buró de Crédito",
        ));
    }
    if !input.twilio {
        errors.push(FieldError::new(
            "twilio",
            "Autorizá la verificación de identidad",
        ));
    }
    finish(errors, ConsentPayload::granted())
}

/// KYC personal data. The RFC is upper-cased.
pub fn validate_personal(input: &PersonalInfo) -> Result<PersonalInfo, AppError> {
    let mut errors = Vec::new();
    let first_name = input.first_name.trim().to_string();
    let last_name = input.last_name.trim().to_string();
    let birth_date = input.birth_date.trim().to_string();
    let cedula = input.cedula.trim().to_uppercase();
    let nationality = input.nationality.trim().to_string();
    let marital_status = input.marital_status.trim().to_string();

    if char_len(&first_name) < 2 {
        errors.push(FieldError::new("first_name", "Ingresá tu nombre"));
    }
    if char_len(&last_name) < 2 {
        errors.push(FieldError::new("last_name", "Ingresá tu apellido"));
    }
    if !compiled(&ISO_DATE, r"^\d{4}-\d{2}-\d{2}$").is_match(&birth_date) {
        errors.push(FieldError::new("birth_date", "Formato: AAAA-MM-DD"));
    }
    if !(12..=13).contains(&char_len(&cedula)) {
        errors.push(FieldError::new("cedula", "El RFC tiene 12 o 13 caracteres"));
    }
    if char_len(&nationality) < 2 {
        errors.push(FieldError::new("nationality", "Ingresá tu nacionalidad"));
    }
    if !MARITAL_STATUSES.contains(&marital_status.as_str()) {
        errors.push(FieldError::new("marital_status", "Seleccioná un estado civil"));
    }

    finish(
        errors,
        PersonalInfo {
            first_name,
            last_name,
            birth_date,
            cedula,
            nationality,
            marital_status,
        },
    )
}

pub fn validate_address(input: &AddressInfo) -> Result<AddressInfo, AppError> {
    let mut errors = Vec::new();
    let street = input.street.trim().to_string();
    let postal_code = input.postal_code.trim().to_string();
    let city = input.city.trim().to_string();
    let state = input.state.trim().to_string();
    let country = match input.country.trim() {
        "" => "México".to_string(),
        other => other.to_string(),
    };

    if char_len(&street) < 3 {
        errors.push(FieldError::new("street", "Ingresá la dirección"));
    }
    if postal_code.len() != 5 || !postal_code.chars().all(|c| c.is_ascii_digit()) {
        errors.push(FieldError::new("postal_code", "El CP debe tener 5 dígitos"));
    }
    if char_len(&city) < 2 {
        errors.push(FieldError::new("city", "Ingresá la ciudad"));
    }
    if char_len(&state) < 2 {
        errors.push(FieldError::new("state", "Ingresá el estado"));
    }

    finish(
        errors,
        AddressInfo {
            street,
            neighborhood: input.neighborhood.trim().to_string(),
            postal_code,
            city,
            state,
            country,
        },
    )
}

pub fn validate_bank(input: &BankAccount) -> Result<BankAccount, AppError> {
    let mut errors = Vec::new();
    let clabe = input.clabe.trim().to_string();
    let bank_name = input.bank_name.trim().to_string();
    let account_type = input.account_type.trim().to_string();
    let account_holder = input.account_holder.trim().to_string();

    if clabe.len() != 18 || !clabe.chars().all(|c| c.is_ascii_digit()) {
        errors.push(FieldError::new("clabe", "La CLABE debe tener 18 dígitos"));
    }
    if char_len(&bank_name) < 2 {
        errors.push(FieldError::new("bank_name", "Ingresá el banco"));
    }
    if !ACCOUNT_TYPES.contains(&account_type.as_str()) {
        errors.push(FieldError::new("account_type", "Seleccioná un tipo de cuenta"));
    }
    if char_len(&account_holder) < 3 {
        errors.push(FieldError::new(
            "account_holder",
            "Ingresá el nombre del titular",
        ));
    }

    finish(
        errors,
        BankAccount {
            clabe,
            bank_name,
            account_type,
            account_holder,
        },
    )
}

/// Both sides of the INE are required; type and size are not checked.
pub fn validate_documents(docs: &KycDocuments) -> Result<(), AppError> {
    let mut errors = Vec::new();
    if docs.id_front.is_none() {
        errors.push(FieldError::new("id_front", "Subí el frente de tu INE"));
    }
    if docs.id_back.is_none() {
        errors.push(FieldError::new("id_back", "Subí el reverso de tu INE"));
    }
    finish(errors, ())
}
