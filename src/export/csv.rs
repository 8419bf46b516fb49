use chrono::{DateTime, SecondsFormat, Utc};

use crate::db::Pass;

pub const HEADERS: [&str; 12] = [
    "Code",
    "Name",
    "Company",
    "Host",
    "Purpose",
    "Status",
    "Created At",
    "Allow Reentry",
    "Max Entries",
    "Valid Until",
    "Check-in",
    "Check-out",
];

/// One export row, cells in `HEADERS` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRow(pub [String; 12]);

impl ExportRow {
    pub fn get(&self, header: &str) -> Option<&str> {
        HEADERS
            .iter()
            .position(|h| *h == header)
            .map(|index| self.0[index].as_str())
    }
}

fn timestamp(value: Option<DateTime<Utc>>) -> String {
    value
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// Flatten passes to one row per visit. A pass without visits still gets a
/// row, using its last check-in/out stamps.
pub fn passes_to_rows(passes: &[Pass]) -> Vec<ExportRow> {
    let mut rows = Vec::new();
    for pass in passes {
        let max_entries = if pass.allow_reentry {
            pass.max_entries.to_string()
        } else {
            String::new()
        };

        let visits: Vec<(String, String)> = if pass.visits.is_empty() {
            vec![(timestamp(pass.check_in_at), timestamp(pass.check_out_at))]
        } else {
            pass.visits
                .iter()
                .map(|visit| (timestamp(Some(visit.checked_in)), timestamp(visit.checked_out)))
                .collect()
        };

        for (check_in, check_out) in visits {
            rows.push(ExportRow([
                pass.code.clone(),
                pass.name.clone(),
                pass.company.clone(),
                pass.host.clone(),
                pass.purpose.clone(),
                pass.status.to_string(),
                timestamp(pass.created_timestamp()),
                if pass.allow_reentry { "Yes" } else { "No" }.to_string(),
                max_entries.clone(),
                timestamp(pass.valid_until),
                check_in,
                check_out,
            ]));
        }
    }
    rows
}

fn escape(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Header line plus rows joined by `\n`. No rows means an empty document.
pub fn to_csv(rows: &[ExportRow]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(HEADERS.join(","));
    for row in rows {
        lines.push(row.0.iter().map(|cell| escape(cell)).collect::<Vec<_>>().join(","));
    }
    lines.join("\n")
}

/// Suggested file name for an export made on `now`'s date.
pub fn export_file_name(now: DateTime<Utc>) -> String {
    format!("carepass_export_{}.csv", now.format("%Y-%m-%d"))
}
