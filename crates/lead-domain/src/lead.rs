use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// The salon-type enum from the intake form. Serialized/deserialized
/// uppercase on the wire (`"SALON"`, `"BARBER"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalonType {
    Salon,
    Barber,
    Bridal,
    Unisex,
    Other,
}

impl SalonType {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "SALON" => Some(SalonType::Salon),
            "BARBER" => Some(SalonType::Barber),
            "BRIDAL" => Some(SalonType::Bridal),
            "UNISEX" => Some(SalonType::Unisex),
            "OTHER" => Some(SalonType::Other),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SalonType::Salon => "SALON",
            SalonType::Barber => "BARBER",
            SalonType::Bridal => "BRIDAL",
            SalonType::Unisex => "UNISEX",
            SalonType::Other => "OTHER",
        }
    }
}

/// Raw intake payload, already legacy-alias-resolved by the HTTP layer
/// (`name`→`contact_name`, `phone`→`phone_whatsapp`), but not yet
/// normalized or validated. `salon_type_raw` stays a plain string up to
/// this point since an unrecognized value is a validation error, not a
/// deserialization error.
#[derive(Debug, Clone, Default)]
pub struct LeadInput {
    pub business_name: String,
    pub contact_name: String,
    pub phone_whatsapp: String,
    pub city: String,
    pub salon_type_raw: String,
    pub consent: bool,
    pub chair_count: Option<i64>,
    pub specialization: Option<String>,
    pub current_brands_used: Option<String>,
    pub monthly_spend_range: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
    pub page_url_initial: Option<String>,
    pub page_url_current: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub idempotency_key_hash: Option<String>,
    /// The `company` honeypot field. Legitimate clients never set this.
    pub company_honeypot: String,
}

/// A persisted, accepted lead. Immutable after creation.
#[derive(Debug, Clone, Serialize)]
pub struct Lead {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub idempotency_key_hash: Option<String>,
    pub business_name: String,
    pub contact_name: String,
    pub phone_whatsapp: String,
    pub city: String,
    pub salon_type: SalonType,
    pub consent: bool,
    pub chair_count: Option<i64>,
    pub specialization: Option<String>,
    pub current_brands_used: Option<String>,
    pub monthly_spend_range: Option<String>,
    pub email: Option<String>,
    pub message: Option<String>,
    pub page_url_initial: Option<String>,
    pub page_url_current: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

const MAX_SHORT_FIELD: usize = 200;
const MAX_MESSAGE: usize = 2000;
const MAX_URL: usize = 2048;

fn trim_opt(v: &mut Option<String>) {
    if let Some(s) = v {
        let t = s.trim().to_string();
        *v = if t.is_empty() { None } else { Some(t) };
    }
}

/// Normalizes a `LeadInput` in place. Idempotent: `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(input: &mut LeadInput) {
    input.business_name = input.business_name.trim().to_string();
    input.contact_name = input.contact_name.trim().to_string();
    input.city = input.city.trim().to_string();
    input.salon_type_raw = input.salon_type_raw.trim().to_uppercase();

    input.phone_whatsapp = normalize_phone(&input.phone_whatsapp);
    input.company_honeypot = input.company_honeypot.trim().to_string();

    if let Some(email) = &input.email {
        let e = email.trim().to_lowercase();
        input.email = if e.is_empty() { None } else { Some(e) };
    }
    if let Some(hash) = &input.idempotency_key_hash {
        let h = hash.trim().to_lowercase();
        input.idempotency_key_hash = if h.is_empty() { None } else { Some(h) };
    }

    trim_opt(&mut input.specialization);
    trim_opt(&mut input.current_brands_used);
    trim_opt(&mut input.monthly_spend_range);
    trim_opt(&mut input.message);
    trim_opt(&mut input.page_url_initial);
    trim_opt(&mut input.page_url_current);
    trim_opt(&mut input.user_agent);
    trim_opt(&mut input.ip_address);

    if let Some(n) = input.chair_count {
        if n <= 0 {
            input.chair_count = None;
        }
    }
}

/// Keeps decimal digits only; maps a leading national-trunk `0` to the
/// `62` country code and prefixes `+` when the resulting digit count is
/// plausible (10-15 digits, matching most real mobile numbers). Anything
/// else normalizes to empty, which validation then rejects as missing.
fn normalize_phone(raw: &str) -> String {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if let Some(rest) = digits.strip_prefix('0') {
        digits = format!("62{rest}");
    }
    if (10..=15).contains(&digits.len()) {
        format!("+{digits}")
    } else {
        String::new()
    }
}

/// Validates a normalized `LeadInput`. Honeypot is checked first and
/// reported distinctly (`DomainError::Spam`) so callers can answer with a
/// silent 202 instead of a 400.
pub fn validate(input: &LeadInput) -> Result<SalonType, DomainError> {
    if !input.company_honeypot.is_empty() {
        return Err(DomainError::Spam);
    }

    if input.business_name.is_empty() || input.business_name.len() > MAX_SHORT_FIELD {
        return Err(invalid("business_name is required"));
    }
    if input.contact_name.is_empty() || input.contact_name.len() > MAX_SHORT_FIELD {
        return Err(invalid("contact_name is required"));
    }
    if input.phone_whatsapp.is_empty() {
        return Err(invalid("phone_whatsapp is required"));
    }
    if input.city.is_empty() || input.city.len() > MAX_SHORT_FIELD {
        return Err(invalid("city is required"));
    }
    if !input.consent {
        return Err(invalid("consent is required"));
    }
    let salon_type = SalonType::parse(&input.salon_type_raw)
        .ok_or_else(|| invalid("salon_type must be one of SALON, BARBER, BRIDAL, UNISEX, OTHER"))?;

    if let Some(email) = &input.email {
        if email.len() > MAX_SHORT_FIELD || !email.contains('@') {
            return Err(invalid("email is invalid"));
        }
    }
    if let Some(msg) = &input.message {
        if msg.len() > MAX_MESSAGE {
            return Err(invalid("message is too long"));
        }
    }
    for url in [&input.page_url_initial, &input.page_url_current] {
        if let Some(u) = url {
            if u.len() > MAX_URL {
                return Err(invalid("page url is too long"));
            }
        }
    }
    if let Some(n) = input.chair_count {
        if n <= 0 {
            return Err(invalid("chair_count must be positive"));
        }
    }

    Ok(salon_type)
}

fn invalid(reason: &str) -> DomainError {
    DomainError::Invalid {
        reason: reason.to_string(),
    }
}

impl Lead {
    /// Assembles a persisted `Lead` from a normalized, validated input plus
    /// the server-assigned identity. Callers (the store implementations)
    /// are expected to have already run `normalize` then `validate`.
    pub fn from_validated(
        id: Uuid,
        created_at: DateTime<Utc>,
        input: LeadInput,
        salon_type: SalonType,
    ) -> Self {
        Lead {
            id,
            created_at,
            idempotency_key_hash: input.idempotency_key_hash,
            business_name: input.business_name,
            contact_name: input.contact_name,
            phone_whatsapp: input.phone_whatsapp,
            city: input.city,
            salon_type,
            consent: input.consent,
            chair_count: input.chair_count,
            specialization: input.specialization,
            current_brands_used: input.current_brands_used,
            monthly_spend_range: input.monthly_spend_range,
            email: input.email,
            message: input.message,
            page_url_initial: input.page_url_initial,
            page_url_current: input.page_url_current,
            user_agent: input.user_agent,
            ip_address: input.ip_address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LeadInput {
        LeadInput {
            business_name: "  Biz  ".into(),
            contact_name: " A ".into(),
            phone_whatsapp: "081234567890".into(),
            city: " Jakarta ".into(),
            salon_type_raw: "salon".into(),
            consent: true,
            ..Default::default()
        }
    }

    #[test]
    fn normalize_trims_and_uppercases() {
        let mut input = sample();
        normalize(&mut input);
        assert_eq!(input.business_name, "Biz");
        assert_eq!(input.contact_name, "A");
        assert_eq!(input.city, "Jakarta");
        assert_eq!(input.salon_type_raw, "SALON");
        assert_eq!(input.phone_whatsapp, "+6281234567890");
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut input = sample();
        normalize(&mut input);
        let once = input.clone();
        normalize(&mut input);
        assert_eq!(once.business_name, input.business_name);
        assert_eq!(once.phone_whatsapp, input.phone_whatsapp);
        assert_eq!(once.salon_type_raw, input.salon_type_raw);
    }

    #[test]
    fn phone_out_of_range_digit_count_normalizes_to_empty() {
        assert_eq!(normalize_phone("12345"), "");
        assert_eq!(normalize_phone("1".repeat(20).as_str()), "");
    }

    #[test]
    fn honeypot_takes_priority_over_other_validation_failures() {
        let mut input = LeadInput {
            company_honeypot: "bot".into(),
            ..Default::default()
        };
        normalize(&mut input);
        assert!(matches!(validate(&input), Err(DomainError::Spam)));
    }

    #[test]
    fn valid_input_passes() {
        let mut input = sample();
        normalize(&mut input);
        assert!(validate(&input).is_ok());
    }

    #[test]
    fn invalid_salon_type_is_rejected() {
        let mut input = sample();
        input.salon_type_raw = "SPA".into();
        normalize(&mut input);
        assert!(matches!(validate(&input), Err(DomainError::Invalid { .. })));
    }

    #[test]
    fn missing_consent_is_rejected() {
        let mut input = sample();
        input.consent = false;
        normalize(&mut input);
        assert!(matches!(validate(&input), Err(DomainError::Invalid { .. })));
    }

    #[test]
    fn nonpositive_chair_count_is_nulled_by_normalize() {
        let mut input = sample();
        input.chair_count = Some(-5);
        normalize(&mut input);
        assert_eq!(input.chair_count, None);
    }
}
