//! Normalization of stored pass JSON into `Pass` values.
//!
//! Every record read from storage goes through `normalize_list` exactly once,
//! so the rest of the crate only ever sees fully populated passes. Field
//! names written by older builds are resolved through `FIELD_ALIASES`; the
//! first alias present (and non-null) wins.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::helpers::timestamp_from_value;
use super::models::{Pass, PassStatus, Visit};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

const FIELD_ALIASES: &[(&str, &[&str])] = &[
    ("requestedAt", &["requestedAt", "requested_at", "createdAt", "created_at"]),
    ("approvedAt", &["approvedAt", "approved_at"]),
    ("declinedAt", &["declinedAt", "declined_at"]),
    ("checkInAt", &["checkInAt", "checkedInAt", "check_in_at"]),
    ("checkOutAt", &["checkOutAt", "checkedOutAt", "check_out_at"]),
    ("validUntil", &["validUntil", "valid_until", "expiresAt"]),
    ("maxEntries", &["maxEntries", "max_entries"]),
    ("allowReentry", &["allowReentry", "allow_reentry"]),
    ("host", &["host", "hostName", "host_name"]),
];

fn field<'a>(record: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    let aliases = FIELD_ALIASES
        .iter()
        .find(|(canonical, _)| *canonical == name)
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[]);

    aliases
        .iter()
        .copied()
        .chain(std::iter::once(name))
        .filter_map(|key| record.get(key))
        .find(|value| !value.is_null())
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text(record: &Map<String, Value>, name: &str) -> String {
    field(record, name).and_then(text_of).unwrap_or_default()
}

fn optional_text(record: &Map<String, Value>, name: &str) -> Option<String> {
    field(record, name)
        .and_then(text_of)
        .filter(|s| !s.trim().is_empty())
}

fn flag(record: &Map<String, Value>, name: &str) -> bool {
    match field(record, name) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => matches!(s.trim(), "true" | "yes" | "1"),
        _ => false,
    }
}

fn timestamp(id: &str, record: &Map<String, Value>, name: &str) -> Option<DateTime<Utc>> {
    let raw = field(record, name)?;
    let parsed = timestamp_from_value(raw);
    if parsed.is_none() {
        log_warn!("pass {id}: ignoring malformed {name} value {raw}");
    }
    parsed
}

fn max_entries(record: &Map<String, Value>) -> u32 {
    let parsed = match field(record, "maxEntries") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .and_then(|n| u32::try_from(n).ok())
        .filter(|n| *n >= 1)
        .unwrap_or(1)
}

fn status(id: &str, record: &Map<String, Value>) -> PassStatus {
    match field(record, "status").and_then(Value::as_str) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            log_warn!("pass {id}: unknown status '{raw}', treating as created");
            PassStatus::Created
        }),
        None => PassStatus::Created,
    }
}

fn visits(id: &str, record: &Map<String, Value>) -> Vec<Visit> {
    let Some(Value::Array(items)) = field(record, "visits") else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let checked_in = item.get("in").and_then(timestamp_from_value);
            if checked_in.is_none() {
                log_warn!("pass {id}: dropping visit without a readable check-in time");
            }
            Some(Visit {
                checked_in: checked_in?,
                checked_out: item.get("out").and_then(timestamp_from_value),
            })
        })
        .collect()
}

/// Restore the visit invariants: at most one open visit, and it must be the
/// last one exactly when the status says `checked-in`.
fn repair_visits(pass: &mut Pass) {
    for i in 1..pass.visits.len() {
        if pass.visits[i - 1].is_open() {
            pass.visits[i - 1].checked_out = Some(pass.visits[i].checked_in);
        }
    }

    match pass.status {
        PassStatus::Pending | PassStatus::Declined => {
            if let Some(last) = pass.visits.last_mut().filter(|v| v.is_open()) {
                last.checked_out = Some(last.checked_in);
            }
        }
        PassStatus::CheckedIn if !pass.is_inside() => {
            let last_out = pass.visits.last().and_then(|v| v.checked_out);
            match pass.check_in_at {
                Some(at) if last_out.map_or(true, |out| at > out) => {
                    pass.visits.push(Visit::open(at));
                }
                _ => {
                    pass.status = if pass.visits.is_empty() {
                        PassStatus::Created
                    } else {
                        PassStatus::CheckedOut
                    };
                }
            }
        }
        PassStatus::Created | PassStatus::CheckedOut if pass.is_inside() => {
            pass.status = PassStatus::CheckedIn;
        }
        _ => {}
    }
}

pub fn normalize_pass(value: &Value) -> Option<Pass> {
    let Some(record) = value.as_object() else {
        log_warn!("skipping stored pass that is not an object");
        return None;
    };

    let Some(id) = field(record, "id")
        .and_then(text_of)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
    else {
        log_warn!("skipping stored pass without an id");
        return None;
    };

    let mut pass = Pass {
        code: text(record, "code"),
        name: text(record, "name"),
        company: text(record, "company"),
        host: text(record, "host"),
        purpose: text(record, "purpose"),
        notes: text(record, "notes"),
        phone: optional_text(record, "phone"),
        email: optional_text(record, "email"),
        status: status(&id, record),
        allow_reentry: flag(record, "allowReentry"),
        max_entries: max_entries(record),
        valid_until: timestamp(&id, record, "validUntil"),
        visits: visits(&id, record),
        requested_at: timestamp(&id, record, "requestedAt"),
        requested_visit_at: timestamp(&id, record, "requestedVisitAt"),
        requested_reentry: flag(record, "requestedReentry"),
        approved_at: timestamp(&id, record, "approvedAt"),
        approved_by: optional_text(record, "approvedBy"),
        declined_at: timestamp(&id, record, "declinedAt"),
        declined_by: optional_text(record, "declinedBy"),
        decline_reason: optional_text(record, "declineReason"),
        check_in_at: timestamp(&id, record, "checkInAt"),
        check_out_at: timestamp(&id, record, "checkOutAt"),
        id,
    };

    repair_visits(&mut pass);
    Some(pass)
}

pub fn normalize_list(value: &Value) -> Vec<Pass> {
    match value {
        Value::Array(items) => items.iter().filter_map(normalize_pass).collect(),
        Value::Null => Vec::new(),
        other => {
            log_warn!("stored pass list is not an array ({}); ignoring it", kind(other));
            Vec::new()
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn legacy_record_gets_defaults() {
        let pass = normalize_pass(&json!({
            "id": "abc",
            "code": "CP-7Q2K",
            "name": "Grace",
        }))
        .unwrap();

        assert_eq!(pass.status, PassStatus::Created);
        assert!(!pass.allow_reentry);
        assert_eq!(pass.max_entries, 1);
        assert_eq!(pass.valid_until, None);
        assert!(pass.visits.is_empty());
    }

    #[test]
    fn aliases_resolve_to_canonical_fields() {
        let pass = normalize_pass(&json!({
            "id": "abc",
            "created_at": "2025-05-01T08:00:00Z",
            "hostName": "Dr. Rao",
            "max_entries": "3",
            "allow_reentry": true,
            "expiresAt": "2025-05-02T08:00:00Z",
        }))
        .unwrap();

        assert_eq!(
            pass.requested_at,
            Some(Utc.with_ymd_and_hms(2025, 5, 1, 8, 0, 0).unwrap())
        );
        assert_eq!(pass.host, "Dr. Rao");
        assert_eq!(pass.max_entries, 3);
        assert!(pass.allow_reentry);
        assert!(pass.valid_until.is_some());
    }

    #[test]
    fn canonical_name_wins_over_later_aliases() {
        let pass = normalize_pass(&json!({
            "id": "abc",
            "requestedAt": "2025-05-01T08:00:00Z",
            "createdAt": "2020-01-01T00:00:00Z",
        }))
        .unwrap();
        assert_eq!(pass.requested_at.unwrap().format("%Y").to_string(), "2025");
    }

    #[test]
    fn malformed_timestamps_become_absent() {
        let pass = normalize_pass(&json!({
            "id": "abc",
            "approvedAt": "not a date",
            "visits": [{ "in": "garbage", "out": null }],
        }))
        .unwrap();
        assert_eq!(pass.approved_at, None);
        assert!(pass.visits.is_empty());
    }

    #[test]
    fn records_without_id_are_dropped() {
        let list = normalize_list(&json!([
            { "code": "CP-AAAA" },
            { "id": "  ", "code": "CP-BBBB" },
            { "id": "ok", "code": "CP-CCCC" },
            "nonsense",
        ]));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "ok");
    }

    #[test]
    fn non_array_blob_reads_as_empty() {
        assert!(normalize_list(&json!({ "id": "x" })).is_empty());
        assert!(normalize_list(&Value::Null).is_empty());
    }

    #[test]
    fn dangling_visits_are_closed_and_status_follows_open_visit() {
        let pass = normalize_pass(&json!({
            "id": "abc",
            "status": "checked-out",
            "allowReentry": true,
            "maxEntries": 5,
            "visits": [
                { "in": "2025-05-01T08:00:00Z", "out": null },
                { "in": "2025-05-01T10:00:00Z", "out": null },
            ],
        }))
        .unwrap();

        assert_eq!(pass.visits.iter().filter(|v| v.is_open()).count(), 1);
        assert_eq!(
            pass.visits[0].checked_out,
            Some(Utc.with_ymd_and_hms(2025, 5, 1, 10, 0, 0).unwrap())
        );
        assert_eq!(pass.status, PassStatus::CheckedIn);
    }

    #[test]
    fn checked_in_without_visits_gains_open_visit_from_check_in_at() {
        let pass = normalize_pass(&json!({
            "id": "abc",
            "status": "checked-in",
            "checkInAt": "2025-05-01T08:00:00Z",
        }))
        .unwrap();
        assert!(pass.is_inside());
        assert_eq!(pass.status, PassStatus::CheckedIn);
    }

    #[test]
    fn checked_in_without_any_evidence_falls_back() {
        let pass = normalize_pass(&json!({ "id": "abc", "status": "checked-in" })).unwrap();
        assert_eq!(pass.status, PassStatus::Created);
        assert!(!pass.is_inside());
    }
}
