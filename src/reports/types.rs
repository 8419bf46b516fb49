use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Inclusive time window. Missing `from` is unbounded, missing `to` is now.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DashboardRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DashboardRange {
    pub fn new(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self { from, to }
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let to = self.to.unwrap_or(now);
        self.from.map_or(true, |from| at >= from) && at <= to
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HourBucket {
    pub hour: u32,
    pub value: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostCount {
    pub host: String,
    pub count: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Requested,
    Approved,
    Declined,
    CheckIn,
    CheckOut,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecentEvent {
    pub kind: EventKind,
    pub at: DateTime<Utc>,
    pub pass_id: String,
    pub code: String,
    pub name: String,
    /// Who approved or declined, when recorded.
    pub actor: Option<String>,
    /// 1-based visit number for check-in/out events in a pass timeline.
    pub visit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub total: usize,
    pub pending: usize,
    pub checked_in: usize,
    pub created_in_range: usize,
    pub visits_by_hour: Vec<HourBucket>,
    pub top_hosts: Vec<HostCount>,
    pub recent: Vec<RecentEvent>,
}

impl Default for Dashboard {
    fn default() -> Self {
        Self {
            total: 0,
            pending: 0,
            checked_in: 0,
            created_in_range: 0,
            visits_by_hour: (0..24).map(|hour| HourBucket { hour, value: 0 }).collect(),
            top_hosts: Vec::new(),
            recent: Vec::new(),
        }
    }
}
