use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::auth::Session;
use crate::db::{Pass, PassStatus};

const MAX_COMPANY_LEN: usize = 60;
const MAX_STAFF_PURPOSE_LEN: usize = 120;
const MIN_REQUEST_PURPOSE_LEN: usize = 3;
const MAX_REQUEST_PURPOSE_LEN: usize = 300;

fn visitor_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-zÀ-ÖØ-öø-ÿ'’.\- ]{2,80}$").expect("static regex"))
}

fn phone_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+?\d{7,15}$").expect("static regex"))
}

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static regex"))
}

/// Field name to message, in field order.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ValidationErrors(BTreeMap<&'static str, String>);

impl ValidationErrors {
    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.entry(field).or_insert_with(|| message.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_result(self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|(field, message)| format!("{field}: {message}"))
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

/// Pass details entered by front-desk staff.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewPass {
    pub name: String,
    pub company: String,
    pub host: String,
    pub purpose: String,
    pub notes: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub requested_visit_at: Option<DateTime<Utc>>,
    pub allow_reentry: bool,
    pub max_entries: u32,
    pub valid_until: Option<DateTime<Utc>>,
}

/// Request submitted by a visitor without logging in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisitRequest {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub company: String,
    pub host: String,
    pub purpose: String,
    pub requested_visit_at: Option<DateTime<Utc>>,
    pub requested_reentry: bool,
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |s| s.trim().is_empty())
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn validate_new_pass(
    input: &NewPass,
    now: DateTime<Utc>,
    max_entries_cap: u32,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();
    let name = input.name.trim();

    if name.is_empty() {
        errors.add("name", "Please enter visitor name");
    } else if name.chars().any(|c| c.is_ascii_digit()) {
        errors.add("name", "Name should not contain digits");
    } else if name.chars().count() < 2 {
        errors.add("name", "Name too short");
    }

    if input.host.trim().is_empty() {
        errors.add("host", "Please enter host name");
    }
    if input.company.trim().chars().count() > MAX_COMPANY_LEN {
        errors.add("company", "Company name too long");
    }
    if input.purpose.trim().chars().count() > MAX_STAFF_PURPOSE_LEN {
        errors.add("purpose", "Purpose too long");
    }
    if !blank(&input.email) && !email_re().is_match(input.email.as_deref().unwrap_or("").trim()) {
        errors.add("email", "Enter a valid email address");
    }

    if let Some(at) = input.requested_visit_at {
        if at + Duration::minutes(1) < now {
            errors.add("requestedVisitAt", "Preferred time cannot be in the past");
        }
    }

    if input.allow_reentry {
        if input.max_entries < 1 {
            errors.add("maxEntries", "Enter valid max entries (>= 1)");
        } else if input.max_entries > max_entries_cap {
            errors.add("maxEntries", "Max entries seems too large");
        }
    }

    errors.into_result()
}

pub fn validate_visit_request(
    input: &VisitRequest,
    now: DateTime<Utc>,
) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::default();

    let name = input.name.trim();
    if name.is_empty() {
        errors.add("name", "Name is required.");
    } else if !visitor_name_re().is_match(name) {
        errors.add(
            "name",
            "Name must be 2-80 letters; numbers and strange symbols are not allowed.",
        );
    }

    let phone = input.phone.trim();
    if phone.is_empty() {
        errors.add("phone", "Phone number is required.");
    } else if !phone_re().is_match(phone) {
        errors.add("phone", "Enter a valid phone (digits only, optional +, 7-15 digits).");
    }

    if !blank(&input.email) && !email_re().is_match(input.email.as_deref().unwrap_or("").trim()) {
        errors.add("email", "Enter a valid email address.");
    }

    let host = input.host.trim();
    if host.is_empty() {
        errors.add("host", "Host is required (who you're visiting).");
    } else if host.chars().count() < 2 {
        errors.add("host", "Host name is too short.");
    }

    let purpose = input.purpose.trim();
    if purpose.chars().count() < MIN_REQUEST_PURPOSE_LEN {
        errors.add("purpose", "Purpose is required (at least 3 characters).");
    } else if input.purpose.chars().count() > MAX_REQUEST_PURPOSE_LEN {
        errors.add("purpose", "Purpose is too long.");
    }

    if let Some(at) = input.requested_visit_at {
        if at + Duration::minutes(5) < now {
            errors.add("requestedVisitAt", "Visit time cannot be in the past.");
        } else if at > now + Duration::days(365) {
            errors.add("requestedVisitAt", "Visit date must be within the next year.");
        }
    }

    errors.into_result()
}

/// A pending request from the same phone number submitted within `window`.
pub fn find_recent_duplicate<'a>(
    passes: &'a [Pass],
    phone: &str,
    now: DateTime<Utc>,
    window: Duration,
) -> Option<&'a Pass> {
    let phone = phone.trim();
    passes.iter().find(|pass| {
        pass.status == PassStatus::Pending
            && pass.phone.as_deref().map(str::trim) == Some(phone)
            && pass
                .requested_at
                .is_some_and(|at| now.signed_duration_since(at) < window)
    })
}

/// Build a staff-created pass. It starts approved on behalf of `session`;
/// callers check the session may create passes.
pub fn build_staff_pass(
    input: NewPass,
    id: String,
    code: String,
    session: &Session,
    now: DateTime<Utc>,
) -> Pass {
    let mut pass = Pass::new(id, code, input.name.trim());
    pass.company = input.company.trim().to_string();
    pass.host = input.host.trim().to_string();
    pass.purpose = input.purpose.trim().to_string();
    pass.notes = input.notes.trim().to_string();
    pass.phone = trimmed(input.phone);
    pass.email = trimmed(input.email);
    pass.requested_at = Some(now);
    pass.requested_visit_at = input.requested_visit_at;
    pass.requested_reentry = input.allow_reentry;
    pass.allow_reentry = input.allow_reentry;
    pass.max_entries = if input.allow_reentry {
        input.max_entries.max(1)
    } else {
        1
    };
    pass.valid_until = input.valid_until;

    pass.status = PassStatus::Created;
    pass.approved_at = Some(now);
    pass.approved_by = session.actor();
    pass
}

pub fn build_requested_pass(input: VisitRequest, id: String, code: String, now: DateTime<Utc>) -> Pass {
    let mut pass = Pass::new(id, code, input.name.trim());
    pass.phone = trimmed(Some(input.phone));
    pass.email = trimmed(input.email);
    pass.company = input.company.trim().to_string();
    pass.host = input.host.trim().to_string();
    pass.purpose = input.purpose.trim().to_string();
    pass.requested_at = Some(now);
    pass.requested_visit_at = input.requested_visit_at;
    pass.requested_reentry = input.requested_reentry;
    pass.status = PassStatus::Pending;
    pass
}
