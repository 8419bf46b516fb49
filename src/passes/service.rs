//! Read-modify-write orchestration over a `PassStore`.
//!
//! Every mutation follows the same shape: take a snapshot, work out the
//! change with a pure function, then write the whole list back guarded by
//! the snapshot revision. A concurrent writer surfaces as
//! `StoreError::Conflict`; nothing is retried here.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::auth::{Action, Session};
use crate::db::{Pass, PassStatus, PassStore, Snapshot, StoreError};
use crate::export;
use crate::notify::{PassEvent, PassNotifier};
use crate::reports::{self, Dashboard, DashboardRange};
use crate::settings::Settings;

use super::codes::{new_pass_id, unique_code};
use super::intake::{
    build_requested_pass, build_staff_pass, find_recent_duplicate, validate_new_pass,
    validate_visit_request, NewPass, ValidationErrors, VisitRequest,
};
use super::lifecycle::{self, ApprovePolicy, Outcome, Transition};
use super::{lookup, qr};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

#[derive(Debug, Error)]
pub enum PassError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{role} is not allowed to {action}")]
    Forbidden { action: Action, role: String },

    #[error("invalid input: {0}")]
    Invalid(ValidationErrors),
}

pub type PassResult<T> = Result<T, PassError>;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone)]
pub struct PassService {
    store: Arc<dyn PassStore>,
    notifier: PassNotifier,
    settings: Settings,
    clock: Arc<dyn Clock>,
}

impl PassService {
    pub fn new(store: Arc<dyn PassStore>, notifier: PassNotifier, settings: Settings) -> Self {
        Self::with_clock(store, notifier, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn PassStore>,
        notifier: PassNotifier,
        settings: Settings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            notifier,
            settings,
            clock,
        }
    }

    pub fn store(&self) -> Arc<dyn PassStore> {
        self.store.clone()
    }

    pub fn notifier(&self) -> &PassNotifier {
        &self.notifier
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn authorize(&self, session: &Session, action: Action) -> PassResult<()> {
        if session.can(action) {
            Ok(())
        } else {
            Err(PassError::Forbidden {
                action,
                role: session.describe(),
            })
        }
    }

    /// Newest first, optionally narrowed to passes created in `range`.
    pub async fn list(&self, session: &Session, range: &DashboardRange) -> PassResult<Vec<Pass>> {
        self.authorize(session, Action::ListPasses)?;
        let passes = self.store.get_all().await?;
        Ok(reports::filter_by_range(&passes, range, self.clock.now()))
    }

    pub async fn get(&self, session: &Session, id: &str) -> PassResult<Option<Pass>> {
        self.authorize(session, Action::ListPasses)?;
        Ok(self.store.get(id).await?)
    }

    pub async fn pending_count(&self, session: &Session) -> PassResult<usize> {
        self.authorize(session, Action::ListPasses)?;
        let passes = self.store.get_all().await?;
        Ok(passes
            .iter()
            .filter(|pass| pass.status == PassStatus::Pending)
            .count())
    }

    pub async fn create_pass(&self, session: &Session, input: NewPass) -> PassResult<Pass> {
        self.authorize(session, Action::CreatePass)?;
        let now = self.clock.now();
        validate_new_pass(&input, now, self.settings.max_entries_cap).map_err(PassError::Invalid)?;

        let Snapshot {
            mut passes,
            revision,
        } = self.store.snapshot().await?;
        let code = self.next_code(&passes);
        let pass = build_staff_pass(input, new_pass_id(), code, session, now);

        passes.insert(0, pass.clone());
        self.store.save_all_if(revision, passes).await?;

        log_info!(
            "pass {} created by {} ({})",
            pass.code,
            session.describe(),
            pass.status
        );
        self.announce(&pass);
        Ok(pass)
    }

    /// Self-service request. Always lands in `pending`; no session needed.
    pub async fn request_visit(&self, input: VisitRequest) -> PassResult<Pass> {
        let now = self.clock.now();
        validate_visit_request(&input, now).map_err(PassError::Invalid)?;

        let Snapshot {
            mut passes,
            revision,
        } = self.store.snapshot().await?;

        if let Some(existing) = find_recent_duplicate(
            &passes,
            &input.phone,
            now,
            self.settings.duplicate_window(),
        ) {
            log_warn!("duplicate pending request for pass {}", existing.code);
            let mut errors = ValidationErrors::default();
            errors.add(
                "phone",
                "A pending request from this number exists (submitted recently). Please wait or contact reception.",
            );
            return Err(PassError::Invalid(errors));
        }

        let code = self.next_code(&passes);
        let pass = build_requested_pass(input, new_pass_id(), code, now);

        passes.insert(0, pass.clone());
        self.store.save_all_if(revision, passes).await?;

        log_info!("visit request {} submitted", pass.code);
        self.announce(&pass);
        Ok(pass)
    }

    pub async fn approve(
        &self,
        session: &Session,
        id: &str,
        policy: ApprovePolicy,
    ) -> PassResult<Option<Outcome>> {
        self.authorize(session, Action::DecideRequest)?;
        if policy.allow_reentry && policy.max_entries > self.settings.max_entries_cap {
            let mut errors = ValidationErrors::default();
            errors.add("maxEntries", "Max entries seems too large");
            return Err(PassError::Invalid(errors));
        }

        let approver = session.actor();
        self.transition(by_id(id), |pass, now| {
            lifecycle::approve(pass, &policy, approver.as_deref(), now)
        })
        .await
    }

    pub async fn decline(
        &self,
        session: &Session,
        id: &str,
        reason: Option<&str>,
    ) -> PassResult<Option<Outcome>> {
        self.authorize(session, Action::DecideRequest)?;
        let decliner = session.actor();
        self.transition(by_id(id), |pass, now| {
            lifecycle::decline(pass, reason, decliner.as_deref(), now)
        })
        .await
    }

    pub async fn toggle_check(&self, session: &Session, id: &str) -> PassResult<Option<Outcome>> {
        self.authorize(session, Action::Scan)?;
        self.transition(by_id(id), lifecycle::toggle_check).await
    }

    /// Check in or out from typed or scanned text (bare code, id or QR JSON).
    pub async fn scan(&self, session: &Session, raw: &str) -> PassResult<Option<Outcome>> {
        self.authorize(session, Action::Scan)?;
        let decoded = qr::decode(raw);
        let Some(token) = lookup::normalize_token(decoded.token()) else {
            return Ok(None);
        };
        self.transition(
            move |passes: &[Pass]| position_of(passes, lookup::find_by_token(passes, &token)),
            lifecycle::toggle_check,
        )
        .await
    }

    pub async fn find_by_code(&self, session: &Session, raw: &str) -> PassResult<Option<Pass>> {
        self.authorize(session, Action::ListPasses)?;
        let passes = self.store.get_all().await?;
        Ok(lookup::find_by_code(&passes, raw).cloned())
    }

    pub async fn find_by_value(&self, session: &Session, value: &Value) -> PassResult<Option<Pass>> {
        self.authorize(session, Action::ListPasses)?;
        let passes = self.store.get_all().await?;
        Ok(lookup::find_by_value(&passes, value).cloned())
    }

    /// Status lookup for a visitor holding their own code or link id.
    pub async fn track(&self, raw: &str) -> PassResult<Option<Pass>> {
        let passes = self.store.get_all().await?;
        Ok(lookup::find_by_code(&passes, raw).cloned())
    }

    pub async fn delete(&self, session: &Session, id: &str) -> PassResult<bool> {
        self.authorize(session, Action::DeletePass)?;
        let removed = self.store.delete(id).await?;
        if removed {
            log_info!("pass {id} deleted by {}", session.describe());
        }
        Ok(removed)
    }

    pub async fn dashboard<Tz: TimeZone>(
        &self,
        session: &Session,
        range: &DashboardRange,
        tz: &Tz,
    ) -> PassResult<Dashboard> {
        self.authorize(session, Action::ViewDashboard)?;
        let passes = self.store.get_all().await?;
        Ok(reports::compute_dashboard(&passes, range, self.clock.now(), tz))
    }

    pub async fn export_csv(&self, session: &Session, range: &DashboardRange) -> PassResult<String> {
        self.authorize(session, Action::Export)?;
        let passes = self.store.get_all().await?;
        let selected = reports::filter_by_range(&passes, range, self.clock.now());
        Ok(export::to_csv(&export::passes_to_rows(&selected)))
    }

    fn next_code(&self, passes: &[Pass]) -> String {
        let mut rng = rand::thread_rng();
        unique_code(
            &mut rng,
            &self.settings.code_prefix,
            passes,
            self.settings.max_code_attempts,
        )
    }

    fn announce(&self, pass: &Pass) {
        let delivered = self.notifier.publish(PassEvent::new_pass(pass));
        if delivered == 0 {
            log::debug!("no listeners for new pass {}", pass.code);
        }
    }

    async fn transition<L, F>(&self, locate: L, step: F) -> PassResult<Option<Outcome>>
    where
        L: FnOnce(&[Pass]) -> Option<usize>,
        F: FnOnce(&Pass, DateTime<Utc>) -> Transition,
    {
        let Snapshot {
            mut passes,
            revision,
        } = self.store.snapshot().await?;
        let Some(index) = locate(&passes) else {
            return Ok(None);
        };

        let current = &passes[index];
        let outcome = Outcome::from_transition(current, step(current, self.clock.now()));
        match &outcome {
            Outcome::Applied { pass } => {
                passes[index] = pass.clone();
                self.store.save_all_if(revision, passes).await?;
                log_info!("pass {} is now {}", pass.code, pass.status);
            }
            Outcome::Blocked { reason, pass } => {
                log_info!("pass {} blocked: {}", pass.code, reason.as_str());
            }
        }
        Ok(Some(outcome))
    }
}

fn by_id(id: &str) -> impl FnOnce(&[Pass]) -> Option<usize> + '_ {
    move |passes: &[Pass]| passes.iter().position(|pass| pass.id == id)
}

fn position_of(passes: &[Pass], found: Option<&Pass>) -> Option<usize> {
    let found = found?;
    passes.iter().position(|pass| std::ptr::eq(pass, found))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::login;
    use crate::db::MemoryPassStore;
    use crate::passes::lifecycle::BlockReason;
    use chrono::Duration;
    use std::sync::Mutex;

    struct ManualClock(Mutex<DateTime<Utc>>);

    impl ManualClock {
        fn advance(&self, minutes: i64) {
            let mut now = self.0.lock().unwrap();
            *now += Duration::minutes(minutes);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    struct Harness {
        service: PassService,
        clock: Arc<ManualClock>,
        store: Arc<MemoryPassStore>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryPassStore::new());
        let clock = Arc::new(ManualClock(Mutex::new(
            Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap(),
        )));
        let service = PassService::with_clock(
            store.clone(),
            PassNotifier::new(),
            Settings::default(),
            clock.clone(),
        );
        Harness {
            service,
            clock,
            store,
        }
    }

    fn as_role(email: &str, password: &str) -> Session {
        Session::for_user(login(email, password).unwrap())
    }

    fn admin() -> Session {
        as_role("admin@demo", "admin")
    }

    fn reception() -> Session {
        as_role("reception@demo", "reception")
    }

    fn security() -> Session {
        as_role("security@demo", "security")
    }

    fn request() -> VisitRequest {
        VisitRequest {
            name: "Ada Lovelace".into(),
            phone: "+441234567890".into(),
            host: "Dr. Babbage".into(),
            purpose: "Engine demo".into(),
            ..VisitRequest::default()
        }
    }

    fn new_pass() -> NewPass {
        NewPass {
            name: "Grace Hopper".into(),
            host: "Ops".into(),
            ..NewPass::default()
        }
    }

    #[tokio::test]
    async fn single_use_request_to_exhaustion() {
        let h = harness();
        let pass = h.service.request_visit(request()).await.unwrap();
        assert_eq!(pass.status, PassStatus::Pending);
        assert!(pass.code.starts_with("CP-"));

        let outcome = h.service.toggle_check(&security(), &pass.id).await.unwrap().unwrap();
        assert_eq!(outcome.blocked_reason(), Some(BlockReason::Pending));

        h.clock.advance(5);
        let approved = h
            .service
            .approve(&reception(), &pass.id, ApprovePolicy::default())
            .await
            .unwrap()
            .unwrap()
            .into_pass();
        assert_eq!(approved.status, PassStatus::Created);
        assert_eq!(approved.approved_by.as_deref(), Some("Reception"));

        h.clock.advance(5);
        let payload = qr::encode(&approved);
        let inside = h.service.scan(&security(), &payload).await.unwrap().unwrap();
        assert_eq!(inside.pass().status, PassStatus::CheckedIn);

        h.clock.advance(30);
        let outside = h.service.scan(&security(), &approved.code).await.unwrap().unwrap();
        assert_eq!(outside.pass().status, PassStatus::CheckedOut);

        h.clock.advance(5);
        let third = h.service.scan(&security(), &approved.code).await.unwrap().unwrap();
        assert_eq!(third.blocked_reason(), Some(BlockReason::LimitOrSingleUse));

        let stored = h.store.get(&pass.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PassStatus::CheckedOut);
        assert_eq!(stored.visits.len(), 1);
    }

    #[tokio::test]
    async fn staff_created_pass_is_approved_and_announced() {
        let h = harness();
        let mut rx = h.service.notifier().subscribe();
        let pass = h.service.create_pass(&reception(), new_pass()).await.unwrap();

        assert_eq!(pass.status, PassStatus::Created);
        assert_eq!(pass.requested_at, Some(h.clock.now()));
        assert_eq!(h.store.get_all().await.unwrap()[0].id, pass.id);

        match rx.try_recv().unwrap() {
            PassEvent::NewPass { pass_id, pending, .. } => {
                assert_eq!(pass_id, pass.id);
                assert!(!pending);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn new_passes_are_prepended_with_distinct_codes() {
        let h = harness();
        let first = h.service.create_pass(&admin(), new_pass()).await.unwrap();
        let second = h.service.create_pass(&admin(), new_pass()).await.unwrap();

        let all = h.store.get_all().await.unwrap();
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);
        assert_ne!(first.code, second.code);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn role_gating() {
        let h = harness();
        let pass = h.service.request_visit(request()).await.unwrap();

        let err = h
            .service
            .approve(&security(), &pass.id, ApprovePolicy::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PassError::Forbidden { action: Action::DecideRequest, .. }));
        assert_eq!(err.to_string(), "security is not allowed to approve or decline requests");

        assert!(matches!(
            h.service.toggle_check(&reception(), &pass.id).await,
            Err(PassError::Forbidden { .. })
        ));
        assert!(matches!(
            h.service.delete(&reception(), &pass.id).await,
            Err(PassError::Forbidden { .. })
        ));
        assert!(matches!(
            h.service.create_pass(&security(), new_pass()).await,
            Err(PassError::Forbidden { .. })
        ));
        assert!(matches!(
            h.service.list(&Session::anonymous(), &DashboardRange::default()).await,
            Err(PassError::Forbidden { .. })
        ));
        assert!(matches!(
            h.service.export_csv(&reception(), &DashboardRange::default()).await,
            Err(PassError::Forbidden { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_pending_request_is_rejected() {
        let h = harness();
        h.service.request_visit(request()).await.unwrap();

        h.clock.advance(10);
        let err = h.service.request_visit(request()).await.unwrap_err();
        match err {
            PassError::Invalid(errors) => assert!(errors.get("phone").is_some()),
            other => panic!("unexpected error {other}"),
        }

        h.clock.advance(25);
        assert!(h.service.request_visit(request()).await.is_ok());
        assert_eq!(h.store.get_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_request_writes_nothing() {
        let h = harness();
        let bad = VisitRequest {
            phone: "abc".into(),
            ..request()
        };
        assert!(matches!(
            h.service.request_visit(bad).await,
            Err(PassError::Invalid(_))
        ));
        assert!(h.store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_ids_are_none() {
        let h = harness();
        assert!(h.service.toggle_check(&admin(), "nope").await.unwrap().is_none());
        assert!(h
            .service
            .approve(&admin(), "nope", ApprovePolicy::default())
            .await
            .unwrap()
            .is_none());
        assert!(h.service.scan(&admin(), "CP-NOPE").await.unwrap().is_none());
        assert!(h.service.scan(&admin(), "   ").await.unwrap().is_none());
        assert!(!h.service.delete(&admin(), "nope").await.unwrap());
    }

    #[tokio::test]
    async fn reentry_pass_cycles_until_limit() {
        let h = harness();
        let pass = h.service.request_visit(request()).await.unwrap();
        let policy = ApprovePolicy {
            allow_reentry: true,
            max_entries: 2,
            valid_until: Some(h.clock.now() + Duration::hours(8)),
        };
        h.service.approve(&admin(), &pass.id, policy).await.unwrap();

        for _ in 0..4 {
            h.clock.advance(10);
            let outcome = h.service.toggle_check(&admin(), &pass.id).await.unwrap().unwrap();
            assert!(!outcome.is_blocked());
        }

        h.clock.advance(10);
        let outcome = h.service.toggle_check(&admin(), &pass.id).await.unwrap().unwrap();
        assert_eq!(outcome.blocked_reason(), Some(BlockReason::LimitOrSingleUse));
        assert_eq!(outcome.pass().completed_visits(), 2);
    }

    #[tokio::test]
    async fn oversized_reentry_policy_is_rejected() {
        let h = harness();
        let pass = h.service.request_visit(request()).await.unwrap();
        let policy = ApprovePolicy {
            allow_reentry: true,
            max_entries: 1000,
            valid_until: None,
        };
        assert!(matches!(
            h.service.approve(&admin(), &pass.id, policy).await,
            Err(PassError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn decline_then_track_by_code() {
        let h = harness();
        let pass = h.service.request_visit(request()).await.unwrap();
        let outcome = h
            .service
            .decline(&reception(), &pass.id, Some("Host is away"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.pass().status, PassStatus::Declined);

        let tracked = h.service.track(&pass.code).await.unwrap().unwrap();
        assert_eq!(tracked.decline_reason.as_deref(), Some("Host is away"));

        let again = h
            .service
            .approve(&reception(), &pass.id, ApprovePolicy::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(again.blocked_reason(), Some(BlockReason::AlreadyDecided));
    }

    #[tokio::test]
    async fn lookup_dashboard_and_export() {
        let h = harness();
        let pass = h.service.create_pass(&admin(), new_pass()).await.unwrap();
        h.service.request_visit(request()).await.unwrap();
        h.service.toggle_check(&admin(), &pass.id).await.unwrap();

        let found = h
            .service
            .find_by_value(&security(), &serde_json::json!({ "id": pass.id }))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.code, pass.code);
        assert_eq!(
            h.service.find_by_code(&security(), &pass.code).await.unwrap().unwrap().id,
            pass.id
        );
        assert_eq!(h.service.pending_count(&reception()).await.unwrap(), 1);

        let dashboard = h
            .service
            .dashboard(&admin(), &DashboardRange::default(), &Utc)
            .await
            .unwrap();
        assert_eq!(dashboard.total, 2);
        assert_eq!(dashboard.pending, 1);
        assert_eq!(dashboard.checked_in, 1);
        assert_eq!(dashboard.visits_by_hour[9].value, 1);

        let csv = h
            .service
            .export_csv(&admin(), &DashboardRange::default())
            .await
            .unwrap();
        assert_eq!(csv.lines().count(), 3);
        assert!(csv.contains(&pass.code));
    }

    #[tokio::test]
    async fn delete_removes_pass() {
        let h = harness();
        let pass = h.service.create_pass(&admin(), new_pass()).await.unwrap();
        assert!(h.service.delete(&admin(), &pass.id).await.unwrap());
        assert!(h.service.get(&admin(), &pass.id).await.unwrap().is_none());
    }
}
