mod types;

pub use types::{Dashboard, DashboardRange, EventKind, HostCount, HourBucket, RecentEvent};

use chrono::{DateTime, TimeZone, Timelike, Utc};

use crate::db::{Pass, PassStatus};

pub const TOP_HOSTS: usize = 6;
pub const RECENT_EVENTS: usize = 20;
pub const BLANK_HOST: &str = "—";

/// Passes whose creation time falls in `range`. An unbounded range keeps
/// everything; otherwise passes with no creation time are left out.
pub fn filter_by_range(passes: &[Pass], range: &DashboardRange, now: DateTime<Utc>) -> Vec<Pass> {
    if range.is_unbounded() {
        return passes.to_vec();
    }
    passes
        .iter()
        .filter(|pass| {
            pass.created_timestamp()
                .is_some_and(|at| range.contains(at, now))
        })
        .cloned()
        .collect()
}

pub fn compute_dashboard<Tz: TimeZone>(
    passes: &[Pass],
    range: &DashboardRange,
    now: DateTime<Utc>,
    tz: &Tz,
) -> Dashboard {
    let mut dashboard = Dashboard {
        total: passes.len(),
        ..Dashboard::default()
    };
    let mut hosts: Vec<HostCount> = Vec::new();
    let mut events = Vec::new();

    for pass in passes {
        match pass.status {
            PassStatus::Pending => dashboard.pending += 1,
            PassStatus::CheckedIn => dashboard.checked_in += 1,
            _ => {}
        }

        if pass
            .created_timestamp()
            .is_some_and(|at| range.contains(at, now))
        {
            dashboard.created_in_range += 1;
        }

        for visit in &pass.visits {
            if range.contains(visit.checked_in, now) {
                let hour = visit.checked_in.with_timezone(tz).hour() as usize;
                dashboard.visits_by_hour[hour].value += 1;
            }
        }

        let host = match pass.host.trim() {
            "" => BLANK_HOST,
            host => host,
        };
        match hosts.iter_mut().find(|entry| entry.host == host) {
            Some(entry) => entry.count += 1,
            None => hosts.push(HostCount {
                host: host.to_string(),
                count: 1,
            }),
        }

        events.extend(lifecycle_events(pass));
    }

    // Stable sorts keep first-encountered order among equals.
    hosts.sort_by(|a, b| b.count.cmp(&a.count));
    hosts.truncate(TOP_HOSTS);
    dashboard.top_hosts = hosts;

    events.sort_by(|a, b| b.at.cmp(&a.at));
    events.truncate(RECENT_EVENTS);
    dashboard.recent = events;

    dashboard
}

fn event(pass: &Pass, kind: EventKind, at: DateTime<Utc>, actor: Option<&String>) -> RecentEvent {
    RecentEvent {
        kind,
        at,
        pass_id: pass.id.clone(),
        code: pass.code.clone(),
        name: pass.name.clone(),
        actor: actor.cloned(),
        visit: None,
    }
}

/// One event per lifecycle timestamp present on the pass.
fn lifecycle_events(pass: &Pass) -> Vec<RecentEvent> {
    [
        (EventKind::Requested, pass.requested_at, None),
        (EventKind::Approved, pass.approved_at, pass.approved_by.as_ref()),
        (EventKind::Declined, pass.declined_at, pass.declined_by.as_ref()),
        (EventKind::CheckIn, pass.check_in_at, None),
        (EventKind::CheckOut, pass.check_out_at, None),
    ]
    .into_iter()
    .filter_map(|(kind, at, actor)| at.map(|at| event(pass, kind, at, actor)))
    .collect()
}

/// Full history of a single pass, every visit included, newest first.
pub fn pass_timeline(pass: &Pass) -> Vec<RecentEvent> {
    let mut events: Vec<RecentEvent> = lifecycle_events(pass)
        .into_iter()
        .filter(|e| !matches!(e.kind, EventKind::CheckIn | EventKind::CheckOut))
        .collect();

    for (index, visit) in pass.visits.iter().enumerate() {
        let mut check_in = event(pass, EventKind::CheckIn, visit.checked_in, None);
        check_in.visit = Some(index + 1);
        events.push(check_in);

        if let Some(out) = visit.checked_out {
            let mut check_out = event(pass, EventKind::CheckOut, out, None);
            check_out.visit = Some(index + 1);
            events.push(check_out);
        }
    }

    events.sort_by(|a, b| b.at.cmp(&a.at));
    events
}
