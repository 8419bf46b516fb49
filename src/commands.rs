use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::{
    auth::{login, Session},
    db::Pass,
    notify::PendingWatcher,
    passes::{qr, ApprovePolicy, NewPass, Outcome, PassService, VisitRequest},
    reports::{self, Dashboard, DashboardRange, RecentEvent},
    settings::{Settings, SettingsStore},
};

pub struct AppState {
    pub service: PassService,
    pub settings: SettingsStore,
}

/// `--as` without credentials is anonymous; wrong credentials are an error.
pub fn resolve_session(email: Option<&str>, password: Option<&str>) -> Result<Session, String> {
    match email {
        None => Ok(Session::anonymous()),
        Some(email) => login(email, password.unwrap_or(""))
            .map(Session::for_user)
            .ok_or_else(|| format!("invalid credentials for {email}")),
    }
}

/// Accepts RFC 3339, or a local `YYYY-MM-DDTHH:MM[:SS]` / `YYYY-MM-DD HH:MM`.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| format!("unrecognised timestamp: {value}"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassDetail {
    pub pass: Pass,
    pub qr_payload: String,
    pub timeline: Vec<RecentEvent>,
}

impl From<Pass> for PassDetail {
    fn from(pass: Pass) -> Self {
        Self {
            qr_payload: qr::encode(&pass),
            timeline: reports::pass_timeline(&pass),
            pass,
        }
    }
}

pub async fn create_pass(
    state: &AppState,
    session: &Session,
    input: NewPass,
) -> Result<PassDetail, String> {
    state
        .service
        .create_pass(session, input)
        .await
        .map(PassDetail::from)
        .map_err(|e| e.to_string())
}

pub async fn request_visit(state: &AppState, input: VisitRequest) -> Result<PassDetail, String> {
    state
        .service
        .request_visit(input)
        .await
        .map(PassDetail::from)
        .map_err(|e| e.to_string())
}

fn found(outcome: Option<Outcome>, token: &str) -> Result<Outcome, String> {
    outcome.ok_or_else(|| format!("no pass matches {token}"))
}

pub async fn approve_pass(
    state: &AppState,
    session: &Session,
    id: &str,
    policy: ApprovePolicy,
) -> Result<Outcome, String> {
    let outcome = state
        .service
        .approve(session, id, policy)
        .await
        .map_err(|e| e.to_string())?;
    found(outcome, id)
}

pub async fn decline_pass(
    state: &AppState,
    session: &Session,
    id: &str,
    reason: Option<&str>,
) -> Result<Outcome, String> {
    let outcome = state
        .service
        .decline(session, id, reason)
        .await
        .map_err(|e| e.to_string())?;
    found(outcome, id)
}

pub async fn scan_pass(state: &AppState, session: &Session, token: &str) -> Result<Outcome, String> {
    let outcome = state
        .service
        .scan(session, token)
        .await
        .map_err(|e| e.to_string())?;
    found(outcome, token)
}

pub async fn list_passes(
    state: &AppState,
    session: &Session,
    range: &DashboardRange,
) -> Result<Vec<Pass>, String> {
    state
        .service
        .list(session, range)
        .await
        .map_err(|e| e.to_string())
}

/// Look a pass up by code, id or QR text. Text that parses as JSON is also
/// tried as an already decoded payload.
pub async fn show_pass(state: &AppState, session: &Session, token: &str) -> Result<PassDetail, String> {
    let by_code = state
        .service
        .find_by_code(session, token)
        .await
        .map_err(|e| e.to_string())?;
    let pass = match by_code {
        Some(pass) => Some(pass),
        None => match serde_json::from_str::<Value>(token) {
            Ok(value) => state
                .service
                .find_by_value(session, &value)
                .await
                .map_err(|e| e.to_string())?,
            Err(_) => None,
        },
    };
    pass.map(PassDetail::from)
        .ok_or_else(|| format!("no pass matches {token}"))
}

pub async fn track_pass(state: &AppState, token: &str) -> Result<PassDetail, String> {
    state
        .service
        .track(token)
        .await
        .map_err(|e| e.to_string())?
        .map(PassDetail::from)
        .ok_or_else(|| format!("no pass matches {token}"))
}

pub async fn delete_pass(state: &AppState, session: &Session, id: &str) -> Result<bool, String> {
    state
        .service
        .delete(session, id)
        .await
        .map_err(|e| e.to_string())
}

pub async fn get_dashboard(
    state: &AppState,
    session: &Session,
    range: &DashboardRange,
) -> Result<Dashboard, String> {
    state
        .service
        .dashboard(session, range, &Local)
        .await
        .map_err(|e| e.to_string())
}

pub async fn export_passes(
    state: &AppState,
    session: &Session,
    range: &DashboardRange,
) -> Result<String, String> {
    state
        .service
        .export_csv(session, range)
        .await
        .map_err(|e| e.to_string())
}

pub fn get_settings(state: &AppState) -> Settings {
    state.settings.get()
}

pub fn set_settings(state: &AppState, session: &Session, settings: Settings) -> Result<Settings, String> {
    if !session.has_role(&[crate::auth::Role::Admin]) {
        return Err(format!("{} is not allowed to change settings", session.describe()));
    }
    state.settings.update(settings).map_err(|e| e.to_string())?;
    Ok(state.settings.get())
}

/// Print pass events until Ctrl-C. The watcher keeps the pending count
/// accurate even when no new-pass event arrives.
pub async fn watch_passes(state: &AppState, session: &Session) -> Result<(), String> {
    let pending = state
        .service
        .pending_count(session)
        .await
        .map_err(|e| e.to_string())?;
    log::info!("watching passes ({pending} pending)");

    let mut events = state.service.notifier().subscribe();
    let watcher = PendingWatcher::spawn(
        state.service.store(),
        state.service.notifier().clone(),
        state.settings.get().poll_interval(),
    );

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let line = serde_json::to_string(&event).map_err(|e| e.to_string())?;
                    println!("{line}");
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!("watch output lagged; {missed} events dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    watcher.stop().await;
    Ok(())
}
