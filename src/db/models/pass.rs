//! Visitor pass data models.
//!
//! A `Pass` is persisted as camelCase JSON inside the pass list blob. Older
//! records are run through `db::ingest` before they ever become a `Pass`, so
//! every field here is guaranteed present once loaded.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PassStatus {
    Pending,
    Created,
    CheckedIn,
    CheckedOut,
    Declined,
}

impl PassStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassStatus::Pending => "pending",
            PassStatus::Created => "created",
            PassStatus::CheckedIn => "checked-in",
            PassStatus::CheckedOut => "checked-out",
            PassStatus::Declined => "declined",
        }
    }
}

impl Default for PassStatus {
    fn default() -> Self {
        PassStatus::Created
    }
}

impl fmt::Display for PassStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PassStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim() {
            "pending" => Ok(PassStatus::Pending),
            "created" => Ok(PassStatus::Created),
            "checked-in" => Ok(PassStatus::CheckedIn),
            "checked-out" => Ok(PassStatus::CheckedOut),
            "declined" => Ok(PassStatus::Declined),
            other => Err(anyhow!("unknown pass status '{other}'")),
        }
    }
}

/// One physical visit session. `out` stays `None` while the visitor is inside.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Visit {
    #[serde(rename = "in")]
    pub checked_in: DateTime<Utc>,
    #[serde(rename = "out")]
    pub checked_out: Option<DateTime<Utc>>,
}

impl Visit {
    pub fn open(at: DateTime<Utc>) -> Self {
        Self {
            checked_in: at,
            checked_out: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.checked_out.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pass {
    pub id: String,
    pub code: String,
    pub name: String,
    pub company: String,
    pub host: String,
    pub purpose: String,
    pub notes: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub status: PassStatus,
    pub allow_reentry: bool,
    pub max_entries: u32,
    pub valid_until: Option<DateTime<Utc>>,
    pub visits: Vec<Visit>,
    pub requested_at: Option<DateTime<Utc>>,
    pub requested_visit_at: Option<DateTime<Utc>>,
    pub requested_reentry: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub declined_at: Option<DateTime<Utc>>,
    pub declined_by: Option<String>,
    pub decline_reason: Option<String>,
    pub check_in_at: Option<DateTime<Utc>>,
    pub check_out_at: Option<DateTime<Utc>>,
}

impl Pass {
    /// A blank pass in the `created` state with single-use defaults.
    pub fn new(id: impl Into<String>, code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
            name: name.into(),
            company: String::new(),
            host: String::new(),
            purpose: String::new(),
            notes: String::new(),
            phone: None,
            email: None,
            status: PassStatus::Created,
            allow_reentry: false,
            max_entries: 1,
            valid_until: None,
            visits: Vec::new(),
            requested_at: None,
            requested_visit_at: None,
            requested_reentry: false,
            approved_at: None,
            approved_by: None,
            declined_at: None,
            declined_by: None,
            decline_reason: None,
            check_in_at: None,
            check_out_at: None,
        }
    }

    pub fn open_visit(&self) -> Option<&Visit> {
        self.visits.last().filter(|visit| visit.is_open())
    }

    pub fn is_inside(&self) -> bool {
        self.open_visit().is_some()
    }

    pub fn completed_visits(&self) -> usize {
        self.visits.iter().filter(|visit| !visit.is_open()).count()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.valid_until.is_some_and(|until| now > until)
    }

    /// Best-available creation time, used for range filtering and reporting.
    pub fn created_timestamp(&self) -> Option<DateTime<Utc>> {
        self.requested_at.or(self.approved_at)
    }
}

/// Shallow merge of pass fields. `None` leaves a field untouched; for
/// nullable fields `Some(None)` clears the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassPatch {
    pub name: Option<String>,
    pub company: Option<String>,
    pub host: Option<String>,
    pub purpose: Option<String>,
    pub notes: Option<String>,
    pub phone: Option<Option<String>>,
    pub email: Option<Option<String>>,
    pub status: Option<PassStatus>,
    pub allow_reentry: Option<bool>,
    pub max_entries: Option<u32>,
    pub valid_until: Option<Option<DateTime<Utc>>>,
    pub visits: Option<Vec<Visit>>,
    pub approved_at: Option<Option<DateTime<Utc>>>,
    pub approved_by: Option<Option<String>>,
    pub declined_at: Option<Option<DateTime<Utc>>>,
    pub declined_by: Option<Option<String>>,
    pub decline_reason: Option<Option<String>>,
    pub check_in_at: Option<Option<DateTime<Utc>>>,
    pub check_out_at: Option<Option<DateTime<Utc>>>,
}

impl PassPatch {
    pub fn apply_to(self, pass: &mut Pass) {
        fn set<T>(slot: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *slot = value;
            }
        }

        set(&mut pass.name, self.name);
        set(&mut pass.company, self.company);
        set(&mut pass.host, self.host);
        set(&mut pass.purpose, self.purpose);
        set(&mut pass.notes, self.notes);
        set(&mut pass.phone, self.phone);
        set(&mut pass.email, self.email);
        set(&mut pass.status, self.status);
        set(&mut pass.allow_reentry, self.allow_reentry);
        set(&mut pass.max_entries, self.max_entries);
        set(&mut pass.valid_until, self.valid_until);
        set(&mut pass.visits, self.visits);
        set(&mut pass.approved_at, self.approved_at);
        set(&mut pass.approved_by, self.approved_by);
        set(&mut pass.declined_at, self.declined_at);
        set(&mut pass.declined_by, self.declined_by);
        set(&mut pass.decline_reason, self.decline_reason);
        set(&mut pass.check_in_at, self.check_in_at);
        set(&mut pass.check_out_at, self.check_out_at);
    }

    pub fn applied(self, pass: &Pass) -> Pass {
        let mut next = pass.clone();
        self.apply_to(&mut next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 14, hour, 0, 0).unwrap()
    }

    #[test]
    fn status_serializes_as_kebab_case() {
        let json = serde_json::to_string(&PassStatus::CheckedIn).unwrap();
        assert_eq!(json, "\"checked-in\"");
        assert_eq!("checked-out".parse::<PassStatus>().unwrap(), PassStatus::CheckedOut);
        assert!("archived".parse::<PassStatus>().is_err());
    }

    #[test]
    fn visit_uses_in_and_out_keys() {
        let visit = Visit::open(at(9));
        let value = serde_json::to_value(&visit).unwrap();
        assert!(value.get("in").is_some());
        assert!(value.get("out").unwrap().is_null());
    }

    #[test]
    fn counts_only_closed_visits_as_completed() {
        let mut pass = Pass::new("p1", "CP-AAAA", "Ada");
        pass.visits.push(Visit {
            checked_in: at(9),
            checked_out: Some(at(10)),
        });
        pass.visits.push(Visit::open(at(11)));

        assert_eq!(pass.completed_visits(), 1);
        assert!(pass.is_inside());
        assert_eq!(pass.open_visit().unwrap().checked_in, at(11));
    }

    #[test]
    fn expiry_is_strictly_after_valid_until() {
        let mut pass = Pass::new("p1", "CP-AAAA", "Ada");
        assert!(!pass.is_expired(at(12)));
        pass.valid_until = Some(at(12));
        assert!(!pass.is_expired(at(12)));
        assert!(pass.is_expired(at(13)));
    }

    #[test]
    fn patch_sets_and_clears_fields() {
        let mut pass = Pass::new("p1", "CP-AAAA", "Ada");
        pass.check_out_at = Some(at(8));

        let patch = PassPatch {
            status: Some(PassStatus::CheckedIn),
            check_in_at: Some(Some(at(9))),
            check_out_at: Some(None),
            ..PassPatch::default()
        };
        let next = patch.applied(&pass);

        assert_eq!(next.status, PassStatus::CheckedIn);
        assert_eq!(next.check_in_at, Some(at(9)));
        assert_eq!(next.check_out_at, None);
        assert_eq!(next.name, "Ada");
    }
}
