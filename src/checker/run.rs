//! The account-check run loop
//!
//! A run owns its state outright and lives on its own tokio task. The caller
//! keeps a [`RunHandle`]: a `watch` channel carries the control flag in, an
//! unbounded `mpsc` channel carries [`RunEvent`]s out. The flag is only looked
//! at between checks and during the delay, never while the checker runs.

use super::events::{ControlFlag, RunEvent, RunPhase, RunSummary};
use crate::account::{write_report, ResultSink};
use crate::classifier::Classifier;
use crate::config::RunConfig;
use crate::error::CheckerError;
use crate::models::{Account, CheckOutcome, RunTally};
use crate::proxy::ProxyCursor;
use crate::validator::Validator;
use crate::Result;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Mutable state of one run, owned by the loop task
#[derive(Debug)]
struct RunState {
    run_id: Uuid,
    remaining: VecDeque<Account>,
    cursor: ProxyCursor,
    tally: RunTally,
    outcomes: Vec<CheckOutcome>,
    phase: RunPhase,
}

impl RunState {
    fn new(accounts: Vec<Account>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            tally: RunTally::new(accounts.len()),
            outcomes: Vec::with_capacity(accounts.len()),
            remaining: accounts.into(),
            cursor: ProxyCursor::default(),
            phase: RunPhase::Idle,
        }
    }
}

/// Cloneable sender side of the control flag
#[derive(Debug, Clone)]
pub struct RunControl {
    tx: Arc<watch::Sender<ControlFlag>>,
}

impl RunControl {
    /// Stop before the next account is dequeued; the check in flight finishes
    pub fn pause(&self) {
        self.tx.send_if_modified(|flag| {
            if *flag == ControlFlag::Running {
                *flag = ControlFlag::Paused;
                return true;
            }
            false
        });
    }

    pub fn resume(&self) {
        self.tx.send_if_modified(|flag| {
            if *flag == ControlFlag::Paused {
                *flag = ControlFlag::Running;
                return true;
            }
            false
        });
    }

    /// Flip between paused and running
    pub fn toggle_pause(&self) {
        self.tx.send_if_modified(|flag| match *flag {
            ControlFlag::Running => {
                *flag = ControlFlag::Paused;
                true
            }
            ControlFlag::Paused => {
                *flag = ControlFlag::Running;
                true
            }
            ControlFlag::Cancelled => false,
        });
    }

    /// End the run once the check in flight, if any, has finished
    pub fn cancel(&self) {
        self.tx.send_if_modified(|flag| {
            if *flag != ControlFlag::Cancelled {
                *flag = ControlFlag::Cancelled;
                return true;
            }
            false
        });
    }
}

/// Handle to a started run
pub struct RunHandle {
    run_id: Uuid,
    control: RunControl,
    /// Progress events; closed once the run has ended
    pub events: mpsc::UnboundedReceiver<RunEvent>,
    task: JoinHandle<RunSummary>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn control(&self) -> RunControl {
        self.control.clone()
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) {
        self.control.resume();
    }

    pub fn cancel(&self) {
        self.control.cancel();
    }

    /// Wait for the run to end
    pub async fn join(self) -> std::result::Result<RunSummary, JoinError> {
        self.task.await
    }

    /// Split into the event stream and a join handle for callers that drive both
    pub fn into_parts(self) -> (RunControl, mpsc::UnboundedReceiver<RunEvent>, JoinHandle<RunSummary>) {
        (self.control, self.events, self.task)
    }
}

/// Runs accounts through a [`Validator`] one at a time
pub struct AccountChecker {
    config: RunConfig,
    validator: Arc<dyn Validator>,
    classifier: Classifier,
}

impl AccountChecker {
    pub fn new(config: RunConfig, validator: Arc<dyn Validator>) -> Self {
        let classifier = Classifier::new(config.keywords.clone());
        Self {
            config,
            validator,
            classifier,
        }
    }

    /// Validate the configuration and spawn the run loop.
    ///
    /// Fails before any check runs if the configuration is invalid or there
    /// are no accounts.
    pub fn start(self, accounts: Vec<Account>) -> Result<RunHandle> {
        self.config.validate()?;
        if accounts.is_empty() {
            return Err(CheckerError::EmptyInput {
                path: self
                    .config
                    .input
                    .clone()
                    .unwrap_or_else(|| PathBuf::from("<accounts>")),
            });
        }

        let state = RunState::new(accounts);
        let run_id = state.run_id;
        let (control_tx, control_rx) = watch::channel(ControlFlag::Running);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let span = info_span!("run", run_id = %run_id);
        let task = tokio::spawn(self.run_loop(state, control_rx, events_tx).instrument(span));

        Ok(RunHandle {
            run_id,
            control: RunControl {
                tx: Arc::new(control_tx),
            },
            events: events_rx,
            task,
        })
    }

    async fn run_loop(
        self,
        mut state: RunState,
        mut control: watch::Receiver<ControlFlag>,
        events: mpsc::UnboundedSender<RunEvent>,
    ) -> RunSummary {
        let mut sink = ResultSink::new(&self.config.output);
        let mut max_devices = self.config.max_devices_output.as_ref().map(ResultSink::new);

        state.phase = RunPhase::Running;
        info!(
            total = state.tally.total,
            proxy = %self.config.proxies.describe(),
            delay_secs = self.config.delay.as_secs_f64(),
            "run started"
        );
        emit(
            &events,
            RunEvent::Started {
                run_id: state.run_id,
                total: state.tally.total,
            },
        );

        loop {
            if !checkpoint(&mut control, &mut state, &events).await {
                state.phase = RunPhase::Cancelled;
                info!(tally = %state.tally, "run cancelled");
                emit(&events, RunEvent::Cancelled { tally: state.tally });
                break;
            }

            let Some(account) = state.remaining.pop_front() else {
                state.phase = RunPhase::Completed;
                info!(tally = %state.tally, "run completed");
                emit(&events, RunEvent::Completed { tally: state.tally });
                break;
            };

            let proxy = self.config.proxies.next(&mut state.cursor);
            let result = self
                .validator
                .check(&account, proxy, self.config.timeout)
                .await;
            let classification = self.classifier.classify_result(&result);
            let device_limit = classification.device_limit;
            let outcome = classification.into_outcome(account);

            state.tally.record(outcome.status);
            sink.record_outcome(&outcome);
            emit(
                &events,
                RunEvent::Outcome {
                    outcome: outcome.clone(),
                    tally: state.tally,
                },
            );
            if outcome.is_valid() {
                sink.record_valid(&outcome.account);
            }
            if device_limit {
                if let Some(limited) = max_devices.as_mut() {
                    limited.record(&outcome.account);
                }
            }
            state.outcomes.push(outcome);

            if !state.remaining.is_empty() && !self.config.delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.delay) => {}
                    _ = cancelled(&mut control) => {}
                }
            }
        }

        let unwritten = sink.finish();
        if let Some(limited) = max_devices.as_mut() {
            limited.finish();
        }
        if let Some(path) = &self.config.report {
            if let Err(e) = write_report(path, &state.outcomes) {
                error!("failed to save report: {}", e);
            }
        }

        RunSummary {
            run_id: state.run_id,
            phase: state.phase,
            tally: state.tally,
            outcomes: state.outcomes,
            unwritten,
        }
    }
}

fn emit(events: &mpsc::UnboundedSender<RunEvent>, event: RunEvent) {
    // A closed receiver only means nobody is watching progress
    let _ = events.send(event);
}

/// Gate before dequeuing the next account. Returns false when the run must stop.
async fn checkpoint(
    control: &mut watch::Receiver<ControlFlag>,
    state: &mut RunState,
    events: &mpsc::UnboundedSender<RunEvent>,
) -> bool {
    loop {
        let flag = *control.borrow_and_update();
        match flag {
            ControlFlag::Running => {
                if state.phase == RunPhase::Paused {
                    state.phase = RunPhase::Running;
                    info!("run resumed");
                    emit(events, RunEvent::Resumed { tally: state.tally });
                }
                return true;
            }
            ControlFlag::Cancelled => return false,
            ControlFlag::Paused => {
                if state.phase != RunPhase::Paused {
                    state.phase = RunPhase::Paused;
                    info!(tally = %state.tally, "run paused");
                    emit(events, RunEvent::Paused { tally: state.tally });
                }
                // Every control handle is gone, so nothing can resume us
                if control.changed().await.is_err() {
                    return false;
                }
            }
        }
    }
}

/// Resolves once the flag reads `Cancelled`
async fn cancelled(control: &mut watch::Receiver<ControlFlag>) {
    loop {
        if *control.borrow_and_update() == ControlFlag::Cancelled {
            return;
        }
        if control.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::KeywordSet;
    use crate::models::CheckStatus;
    use crate::proxy::{ProxyConfiguration, ProxyEndpoint, ProxyPolicy, ProxyType};
    use crate::validator::RawOutput;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Clone)]
    enum Reply {
        Output(&'static str, i32),
        Hang,
        Launch,
    }

    #[derive(Default)]
    struct FakeValidator {
        replies: HashMap<String, Reply>,
        calls: Mutex<Vec<(String, Option<String>)>>,
    }

    impl FakeValidator {
        fn new(replies: &[(&str, Reply)]) -> Self {
            Self {
                replies: replies
                    .iter()
                    .map(|(account, reply)| (account.to_string(), reply.clone()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(String, Option<String>)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Validator for FakeValidator {
        async fn check(
            &self,
            account: &Account,
            proxy: Option<&ProxyEndpoint>,
            timeout: Duration,
        ) -> Result<RawOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((account.to_string(), proxy.map(|p| p.host.clone())));

            let reply = self
                .replies
                .get(account.as_str())
                .cloned()
                .unwrap_or(Reply::Output("Account is valid", 0));
            match reply {
                Reply::Output(stdout, code) => Ok(RawOutput::new(stdout, code)),
                Reply::Hang => {
                    tokio::time::sleep(timeout).await;
                    Err(CheckerError::Timeout {
                        account: account.to_string(),
                        after: timeout,
                    })
                }
                Reply::Launch => Err(CheckerError::Launch {
                    program: "fake".to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
                }),
            }
        }
    }

    /// Blocks the check of one account until released
    struct GatedValidator {
        gated: &'static str,
        started: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl GatedValidator {
        fn new(gated: &'static str) -> Self {
            Self {
                gated,
                started: Arc::new(Notify::new()),
                release: Arc::new(Notify::new()),
            }
        }
    }

    #[async_trait]
    impl Validator for GatedValidator {
        async fn check(
            &self,
            account: &Account,
            _proxy: Option<&ProxyEndpoint>,
            _timeout: Duration,
        ) -> Result<RawOutput> {
            if account.as_str() == self.gated {
                self.started.notify_one();
                self.release.notified().await;
            }
            Ok(RawOutput::new("Account is valid", 0))
        }
    }

    fn config(dir: &Path) -> RunConfig {
        RunConfig::new()
            .with_output(dir.join("working.txt"))
            .with_max_devices_output(Some(dir.join("max_devices.txt")))
            .with_delay(Duration::ZERO)
            .with_timeout(Duration::from_secs(1))
            .with_keywords(
                KeywordSet::new(
                    vec!["is valid".to_string()],
                    vec![
                        "does not exist".to_string(),
                        "invalid".to_string(),
                        "too many devices".to_string(),
                    ],
                )
                .with_max_devices(vec!["Too many devices".to_string()]),
            )
    }

    fn accounts(ids: &[&str]) -> Vec<Account> {
        ids.iter().map(|id| Account::new(*id)).collect()
    }

    async fn drain(events: &mut mpsc::UnboundedReceiver<RunEvent>) -> Vec<RunEvent> {
        let mut seen = Vec::new();
        while let Some(event) = events.recv().await {
            seen.push(event);
        }
        seen
    }

    fn outcome_accounts(events: &[RunEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Outcome { outcome, .. } => Some(outcome.account.to_string()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_mixed_outcomes_are_tallied_and_valid_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Arc::new(FakeValidator::new(&[
            ("1111", Reply::Output("Account is valid", 0)),
            ("2222", Reply::Output("Account does not exist", 1)),
            ("3333", Reply::Output("", 0)),
        ]));

        let checker = AccountChecker::new(config(dir.path()), validator.clone());
        let mut handle = checker.start(accounts(&["1111", "2222", "3333"])).unwrap();
        let events = drain(&mut handle.events).await;
        let summary = handle.join().await.unwrap();

        assert_eq!(summary.phase, RunPhase::Completed);
        assert_eq!(summary.tally.valid, 1);
        assert_eq!(summary.tally.invalid, 1);
        assert_eq!(summary.tally.error, 1);
        assert_eq!(summary.unwritten, 0);
        assert_eq!(
            fs::read_to_string(dir.path().join("working.txt")).unwrap(),
            "1111\n"
        );

        assert!(matches!(events.first(), Some(RunEvent::Started { total: 3, .. })));
        assert!(matches!(events.last(), Some(RunEvent::Completed { .. })));
        assert_eq!(outcome_accounts(&events), vec!["1111", "2222", "3333"]);
        assert_eq!(summary.outcomes[2].detail, "empty output");
    }

    #[tokio::test]
    async fn test_device_limited_accounts_are_listed_separately() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Arc::new(FakeValidator::new(&[
            ("2222", Reply::Output("There are too many devices on the account.", 1)),
            ("3333", Reply::Output("Account does not exist", 1)),
            ("4444", Reply::Output("There are too many devices on the account.", 1)),
        ]));

        let checker = AccountChecker::new(config(dir.path()), validator);
        let summary = checker
            .start(accounts(&["1111", "2222", "3333", "4444"]))
            .unwrap()
            .join()
            .await
            .unwrap();

        assert_eq!(summary.tally.valid, 1);
        assert_eq!(summary.tally.invalid, 3);
        assert_eq!(
            fs::read_to_string(dir.path().join("max_devices.txt")).unwrap(),
            "2222\n4444\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("working.txt")).unwrap(),
            "1111\n"
        );
    }

    #[tokio::test]
    async fn test_device_limit_list_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Arc::new(FakeValidator::new(&[(
            "2222",
            Reply::Output("There are too many devices on the account.", 1),
        )]));

        let config = config(dir.path()).with_max_devices_output(None);
        let summary = AccountChecker::new(config, validator)
            .start(accounts(&["2222"]))
            .unwrap()
            .join()
            .await
            .unwrap();

        assert_eq!(summary.tally.invalid, 1);
        assert!(!dir.path().join("max_devices.txt").exists());
    }

    #[tokio::test]
    async fn test_cancel_between_accounts_stops_after_first_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Arc::new(FakeValidator::default());
        let config = config(dir.path()).with_delay(Duration::from_secs(1));

        let checker = AccountChecker::new(config, validator.clone());
        let mut handle = checker.start(accounts(&["1111", "2222", "3333"])).unwrap();

        assert!(matches!(handle.events.recv().await, Some(RunEvent::Started { .. })));
        match handle.events.recv().await {
            Some(RunEvent::Outcome { outcome, .. }) => assert_eq!(outcome.account.as_str(), "1111"),
            other => panic!("expected first outcome, got {:?}", other),
        }
        handle.cancel();

        let rest = drain(&mut handle.events).await;
        let summary = handle.join().await.unwrap();

        assert!(matches!(rest.as_slice(), [RunEvent::Cancelled { .. }]));
        assert_eq!(summary.phase, RunPhase::Cancelled);
        assert_eq!(summary.outcomes.len(), 1);
        assert_eq!(summary.tally.checked(), 1);
        assert_eq!(validator.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_lets_in_flight_check_finish() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Arc::new(GatedValidator::new("1111"));
        let started = validator.started.clone();
        let release = validator.release.clone();

        let checker = AccountChecker::new(config(dir.path()), validator);
        let mut handle = checker.start(accounts(&["1111", "2222"])).unwrap();

        started.notified().await;
        let control = handle.control();
        tokio::spawn(async move { control.cancel() }).await.unwrap();
        release.notify_one();

        let events = drain(&mut handle.events).await;
        let summary = handle.join().await.unwrap();

        assert_eq!(outcome_accounts(&events), vec!["1111"]);
        assert!(matches!(events.last(), Some(RunEvent::Cancelled { .. })));
        assert_eq!(summary.phase, RunPhase::Cancelled);
        assert_eq!(summary.outcomes[0].status, CheckStatus::Valid);
    }

    #[tokio::test]
    async fn test_timeout_becomes_error_and_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Arc::new(FakeValidator::new(&[("1111", Reply::Hang)]));

        let checker = AccountChecker::new(config(dir.path()), validator);
        let handle = checker.start(accounts(&["1111", "2222"])).unwrap();
        let summary = handle.join().await.unwrap();

        assert_eq!(summary.phase, RunPhase::Completed);
        assert_eq!(summary.outcomes.len(), 2);
        assert_eq!(summary.outcomes[0].status, CheckStatus::Error);
        assert!(summary.outcomes[0].detail.contains("timed out"));
        assert_eq!(summary.outcomes[1].status, CheckStatus::Valid);
    }

    #[tokio::test]
    async fn test_launch_failure_becomes_error() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Arc::new(FakeValidator::new(&[("1111", Reply::Launch)]));

        let checker = AccountChecker::new(config(dir.path()), validator);
        let summary = checker
            .start(accounts(&["1111", "2222"]))
            .unwrap()
            .join()
            .await
            .unwrap();

        assert_eq!(summary.tally.error, 1);
        assert_eq!(summary.tally.valid, 1);
        assert!(summary.outcomes[0].detail.starts_with("launch failed"));
    }

    #[tokio::test]
    async fn test_pause_holds_next_account_until_resume() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Arc::new(GatedValidator::new("1111"));
        let started = validator.started.clone();
        let release = validator.release.clone();

        let checker = AccountChecker::new(config(dir.path()), validator);
        let mut handle = checker.start(accounts(&["1111", "2222"])).unwrap();

        started.notified().await;
        handle.pause();
        release.notify_one();

        assert!(matches!(handle.events.recv().await, Some(RunEvent::Started { .. })));
        assert!(matches!(handle.events.recv().await, Some(RunEvent::Outcome { .. })));
        assert!(matches!(handle.events.recv().await, Some(RunEvent::Paused { .. })));

        let idle = tokio::time::timeout(Duration::from_millis(200), handle.events.recv()).await;
        assert!(idle.is_err(), "no account may be checked while paused");

        handle.resume();
        let rest = drain(&mut handle.events).await;
        assert!(matches!(rest.first(), Some(RunEvent::Resumed { .. })));
        assert_eq!(outcome_accounts(&rest), vec!["2222"]);
        assert!(matches!(rest.last(), Some(RunEvent::Completed { .. })));

        let summary = handle.join().await.unwrap();
        assert_eq!(summary.phase, RunPhase::Completed);
        assert_eq!(summary.tally.valid, 2);
    }

    #[tokio::test]
    async fn test_rotation_advances_once_per_check() {
        let dir = tempfile::tempdir().unwrap();
        let proxies = ProxyConfiguration::new(
            vec![
                ProxyEndpoint::new("p0".to_string(), 1080, ProxyType::Socks5),
                ProxyEndpoint::new("p1".to_string(), 1080, ProxyType::Socks5),
            ],
            ProxyPolicy::RotateRoundRobin,
        );
        let validator = Arc::new(FakeValidator::default());

        let checker =
            AccountChecker::new(config(dir.path()).with_proxies(proxies), validator.clone());
        checker
            .start(accounts(&["a", "b", "c"]))
            .unwrap()
            .join()
            .await
            .unwrap();

        let used: Vec<_> = validator.calls().into_iter().map(|(_, p)| p).collect();
        assert_eq!(
            used,
            vec![
                Some("p0".to_string()),
                Some("p1".to_string()),
                Some("p0".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn test_report_is_written_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("report.txt");
        let validator = Arc::new(FakeValidator::new(&[(
            "2222",
            Reply::Output("Account does not exist", 1),
        )]));

        let checker = AccountChecker::new(config(dir.path()).with_report(&report), validator);
        checker
            .start(accounts(&["1111", "2222"]))
            .unwrap()
            .join()
            .await
            .unwrap();

        assert_eq!(
            fs::read_to_string(&report).unwrap(),
            "1111 - Valid - account accepted\n2222 - Invalid - does not exist\n"
        );
    }

    #[tokio::test]
    async fn test_no_accounts_fails_before_run() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Arc::new(FakeValidator::default());

        let checker = AccountChecker::new(config(dir.path()), validator.clone());
        let err = checker.start(Vec::new()).err().unwrap();

        assert!(matches!(err, CheckerError::EmptyInput { .. }));
        assert!(validator.calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_config_fails_before_run() {
        let dir = tempfile::tempdir().unwrap();
        let validator = Arc::new(FakeValidator::default());
        let config = config(dir.path()).with_delay(Duration::from_secs(120));

        let checker = AccountChecker::new(config, validator.clone());
        let err = checker.start(accounts(&["1111"])).err().unwrap();

        assert!(matches!(err, CheckerError::Config(_)));
        assert!(validator.calls().is_empty());
        assert!(!dir.path().join("working.txt").exists());
    }
}
