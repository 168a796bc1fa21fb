//! Drives one host through a guarded change.
//!
//! ```text
//! Start → BackedUp → Applied → Restarted → HealthChecked → Committed
//!                                  │              │
//!                                  └──── failure ─┴──→ RolledBack
//! ```
//!
//! Every step past `Applied` can be skipped by the `MutationConfig`; with
//! backup, restart and health check all disabled the machine degrades to
//! `Applied → Committed`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use tracing::{error, info, warn};

use wpfleet_core::{Confirmer, HostTarget, MutationConfig, PromptError};
use wpfleet_health::{HealthStatus, HealthVerdict, VerdictSource};
use wpfleet_remote::{
    BackupRecord, ConfigDocument, Connection, RemoteConfigStore, StoreResult, Transport, Value,
    Workload,
};

use crate::error::MutationError;
use crate::executor::FanOutResult;

/// Furthest phase a host reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationPhase {
    Start,
    BackedUp,
    Applied,
    Restarted,
    HealthChecked,
    Committed,
    RolledBack,
}

/// The change to make on every host.
#[derive(Debug, Clone)]
pub enum Mutation {
    SetValue {
        section: String,
        key: String,
        value: Value,
    },
    DeleteKey {
        section: String,
        key: String,
    },
    DeleteSection {
        section: String,
    },
    ReplaceDocument(ConfigDocument),
}

impl Mutation {
    pub fn describe(&self) -> String {
        match self {
            Mutation::SetValue {
                section,
                key,
                value,
            } => {
                let rendered = serde_yaml::to_string(value)
                    .map(|s| s.trim_end().to_string())
                    .unwrap_or_else(|_| "<value>".to_string());
                format!("set {section}.{key} = {rendered}")
            }
            Mutation::DeleteKey { section, key } => format!("unset {section}.{key}"),
            Mutation::DeleteSection { section } => format!("drop section {section}"),
            Mutation::ReplaceDocument(_) => "replace document".to_string(),
        }
    }

    pub async fn apply(&self, store: &RemoteConfigStore<'_>) -> StoreResult<()> {
        match self {
            Mutation::SetValue {
                section,
                key,
                value,
            } => store.set_value(section, key, value.clone()).await,
            Mutation::DeleteKey { section, key } => store.delete_key(section, key).await,
            Mutation::DeleteSection { section } => store.delete_section(section).await,
            Mutation::ReplaceDocument(doc) => store.write(doc).await,
        }
    }
}

/// How a host's mutation ended, for tallying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    Committed,
    RolledBack,
    Failed,
    RollbackFailed,
}

/// Result of one host's mutation.
#[derive(Debug, Clone, Serialize)]
pub struct MutationOutcome {
    pub target: HostTarget,
    pub phase: MutationPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<BackupRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<HealthVerdict>,
    #[serde(serialize_with = "error_text", skip_serializing_if = "Option::is_none")]
    pub error: Option<MutationError>,
    #[serde(rename = "duration_ms", serialize_with = "duration_ms")]
    pub duration: Duration,
}

impl MutationOutcome {
    fn new(target: HostTarget) -> Self {
        Self {
            target,
            phase: MutationPhase::Start,
            backup: None,
            verdict: None,
            error: None,
            duration: Duration::ZERO,
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        match (&self.error, self.phase) {
            (None, _) => OutcomeKind::Committed,
            (Some(e), _) if e.is_rollback_failure() => OutcomeKind::RollbackFailed,
            (Some(_), MutationPhase::RolledBack) => OutcomeKind::RolledBack,
            (Some(_), _) => OutcomeKind::Failed,
        }
    }
}

impl FanOutResult for MutationOutcome {
    fn aborted(target: HostTarget, reason: String) -> Self {
        Self {
            error: Some(MutationError::Aborted(reason)),
            ..Self::new(target)
        }
    }
}

fn error_text<S: Serializer>(e: &Option<MutationError>, s: S) -> Result<S::Ok, S::Error> {
    match e {
        Some(e) => s.serialize_str(&e.to_string()),
        None => s.serialize_none(),
    }
}

fn duration_ms<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u128(d.as_millis())
}

/// Ask before a mutating fan-out. `skip_confirm` answers for the operator.
pub fn confirm_mutation(
    config: &MutationConfig,
    confirmer: &dyn Confirmer,
    prompt: &str,
) -> Result<bool, PromptError> {
    if config.skip_confirm {
        return Ok(true);
    }
    confirmer.confirm(prompt)
}

/// Runs one mutation against one already-connected host.
pub struct MutationController<'a> {
    config: &'a MutationConfig,
    workload: &'a Workload,
    verdicts: &'a dyn VerdictSource,
}

impl<'a> MutationController<'a> {
    pub fn new(
        config: &'a MutationConfig,
        workload: &'a Workload,
        verdicts: &'a dyn VerdictSource,
    ) -> Self {
        Self {
            config,
            workload,
            verdicts,
        }
    }

    pub async fn run(
        &self,
        target: &HostTarget,
        conn: &dyn Connection,
        mutation: &Mutation,
    ) -> MutationOutcome {
        let started = Instant::now();
        let mut outcome = MutationOutcome::new(target.clone());
        self.drive(target, conn, mutation, &mut outcome).await;
        outcome.duration = started.elapsed();
        outcome
    }

    async fn drive(
        &self,
        target: &HostTarget,
        conn: &dyn Connection,
        mutation: &Mutation,
        outcome: &mut MutationOutcome,
    ) {
        let store = RemoteConfigStore::new(conn, self.workload.compose_file());

        if !self.config.skip_backup {
            match store.backup().await {
                Ok(record) => outcome.backup = Some(record),
                Err(e) => {
                    warn!(host = %target, error = %e, "backup failed, host left untouched");
                    outcome.error = Some(MutationError::Backup(e));
                    return;
                }
            }
        }
        outcome.phase = MutationPhase::BackedUp;

        if let Err(e) = mutation.apply(&store).await {
            warn!(host = %target, error = %e, "apply failed");
            outcome.error = Some(MutationError::Apply(e));
            return;
        }
        outcome.phase = MutationPhase::Applied;
        info!(host = %target, change = %mutation.describe(), "change applied");

        if !self.config.skip_restart {
            if let Err(e) = self.workload.restart(conn).await {
                self.roll_back(target, conn, &store, MutationError::Restart(e), outcome)
                    .await;
                return;
            }
        }
        outcome.phase = MutationPhase::Restarted;

        if !self.config.skip_health_check {
            if !self.config.settle_delay.is_zero() {
                tokio::time::sleep(self.config.settle_delay).await;
            }
            let verdict = self
                .verdicts
                .evaluate(target, Some(conn), &self.config.probes)
                .await;
            let status = verdict.status;
            let warnings = verdict.warnings.clone();
            outcome.verdict = Some(verdict);
            outcome.phase = MutationPhase::HealthChecked;

            match status {
                HealthStatus::Unhealthy => {
                    let trigger = MutationError::Unhealthy { status, warnings };
                    self.roll_back(target, conn, &store, trigger, outcome).await;
                    return;
                }
                HealthStatus::Degraded | HealthStatus::Unknown => {
                    warn!(host = %target, %status, ?warnings, "committing despite health warnings");
                }
                HealthStatus::Healthy => {}
            }
        }

        outcome.phase = MutationPhase::Committed;
        info!(host = %target, "change committed");
    }

    async fn roll_back(
        &self,
        target: &HostTarget,
        conn: &dyn Connection,
        store: &RemoteConfigStore<'_>,
        trigger: MutationError,
        outcome: &mut MutationOutcome,
    ) {
        if self.config.skip_rollback {
            warn!(host = %target, error = %trigger, "rollback disabled, change stays applied");
            outcome.error = Some(trigger);
            return;
        }

        warn!(host = %target, error = %trigger, "rolling back");
        match self.restore(conn, store, outcome.backup.as_ref()).await {
            Ok(()) => {
                outcome.phase = MutationPhase::RolledBack;
                info!(host = %target, "rolled back");
                outcome.error = Some(trigger);
            }
            Err(cause) => {
                error!(host = %target, trigger = %trigger, %cause, "rollback failed, host needs attention");
                outcome.error = Some(MutationError::RollbackFailed {
                    trigger: Box::new(trigger),
                    cause,
                });
            }
        }
    }

    async fn restore(
        &self,
        conn: &dyn Connection,
        store: &RemoteConfigStore<'_>,
        backup: Option<&BackupRecord>,
    ) -> Result<(), String> {
        let backup = backup.ok_or_else(|| "no backup to restore".to_string())?;
        store.restore(&backup.path).await.map_err(|e| e.to_string())?;
        if !self.config.skip_restart {
            self.workload
                .restart(conn)
                .await
                .map_err(|e| format!("restart after restore: {e}"))?;
        }
        Ok(())
    }
}

/// Everything a fan-out worker needs to mutate one host, shared across
/// workers.
#[derive(Clone)]
pub struct FleetMutation {
    pub transport: Arc<dyn Transport>,
    pub verdicts: Arc<dyn VerdictSource>,
    pub workload: Workload,
    pub config: MutationConfig,
    pub mutation: Mutation,
}

impl FleetMutation {
    /// Connect, run the controller, close.
    pub async fn run_one(&self, target: HostTarget) -> MutationOutcome {
        let started = Instant::now();
        let conn = match self.transport.connect(&target).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(host = %target, error = %e, "connect failed");
                return MutationOutcome {
                    error: Some(MutationError::Connect(e)),
                    duration: started.elapsed(),
                    ..MutationOutcome::new(target)
                };
            }
        };

        let controller = MutationController::new(&self.config, &self.workload, &*self.verdicts);
        let mut outcome = controller.run(&target, &*conn, &self.mutation).await;
        conn.close().await;
        outcome.duration = started.elapsed();
        outcome
    }
}


#[cfg(test)]
mod tests {
    use wpfleet_remote::memory::Response;

    use super::test_support::*;
    use super::*;

    async fn debug_value(host: &wpfleet_remote::memory::MemoryHost) -> String {
        let store = RemoteConfigStore::new(host, COMPOSE);
        match store
            .get_value("services.wordpress", "environment.WORDPRESS_DEBUG")
            .await
            .unwrap()
        {
            Value::String(s) => s,
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[tokio::test]
    async fn healthy_change_commits_and_keeps_backup() {
        let host = site("wp01");
        let config = config();
        let workload = workload();
        let verdicts = FixedVerdict(HealthStatus::Healthy);
        let outcome = MutationController::new(&config, &workload, &verdicts)
            .run(&HostTarget::new("wp01"), &host, &set_debug())
            .await;

        assert_eq!(outcome.kind(), OutcomeKind::Committed);
        assert_eq!(outcome.phase, MutationPhase::Committed);
        let backup = outcome.backup.unwrap();
        assert_eq!(host.file(&backup.path).as_deref(), Some(DOCUMENT));
        assert_eq!(debug_value(&host).await, "1");
        assert!(host.commands().iter().any(|c| c.starts_with("docker compose")));
    }

    #[tokio::test]
    async fn unhealthy_verdict_rolls_back() {
        let host = site("wp01");
        let config = config();
        let workload = workload();
        let verdicts = FixedVerdict(HealthStatus::Unhealthy);
        let outcome = MutationController::new(&config, &workload, &verdicts)
            .run(&HostTarget::new("wp01"), &host, &set_debug())
            .await;

        assert_eq!(outcome.kind(), OutcomeKind::RolledBack);
        assert!(matches!(outcome.error, Some(MutationError::Unhealthy { .. })));
        assert_eq!(host.file(COMPOSE).as_deref(), Some(DOCUMENT));
        let restarts = host
            .commands()
            .iter()
            .filter(|c| c.starts_with("docker compose"))
            .count();
        assert_eq!(restarts, 2);
    }

    #[tokio::test]
    async fn rollback_disabled_leaves_change_applied() {
        let host = site("wp01");
        let config = MutationConfig {
            skip_rollback: true,
            ..config()
        };
        let workload = workload();
        let verdicts = FixedVerdict(HealthStatus::Unhealthy);
        let outcome = MutationController::new(&config, &workload, &verdicts)
            .run(&HostTarget::new("wp01"), &host, &set_debug())
            .await;

        assert_eq!(outcome.kind(), OutcomeKind::Failed);
        assert_eq!(outcome.phase, MutationPhase::HealthChecked);
        assert_eq!(debug_value(&host).await, "1");
    }

    #[tokio::test]
    async fn rollback_without_backup_is_rollback_failure() {
        let host = site("wp01");
        let config = MutationConfig {
            skip_backup: true,
            ..config()
        };
        let workload = workload();
        let verdicts = FixedVerdict(HealthStatus::Unhealthy);
        let outcome = MutationController::new(&config, &workload, &verdicts)
            .run(&HostTarget::new("wp01"), &host, &set_debug())
            .await;

        assert_eq!(outcome.kind(), OutcomeKind::RollbackFailed);
        match outcome.error {
            Some(MutationError::RollbackFailed { trigger, cause }) => {
                assert!(matches!(*trigger, MutationError::Unhealthy { .. }));
                assert_eq!(cause, "no backup to restore");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn restart_failure_triggers_rollback() {
        let host = site("wp01");
        host.on_sequence(
            "docker compose",
            vec![Response::fail(1, "image pull failed"), Response::ok("")],
        );
        let config = config();
        let workload = workload();
        let verdicts = FixedVerdict(HealthStatus::Healthy);
        let outcome = MutationController::new(&config, &workload, &verdicts)
            .run(&HostTarget::new("wp01"), &host, &set_debug())
            .await;

        assert_eq!(outcome.kind(), OutcomeKind::RolledBack);
        assert!(matches!(outcome.error, Some(MutationError::Restart(_))));
        assert!(outcome.verdict.is_none());
        assert_eq!(host.file(COMPOSE).as_deref(), Some(DOCUMENT));
    }

    #[tokio::test]
    async fn failed_restart_during_rollback_is_rollback_failure() {
        let host = site("wp01");
        host.on("docker compose", Response::fail(1, "daemon not running"));
        let config = config();
        let workload = workload();
        let verdicts = FixedVerdict(HealthStatus::Healthy);
        let outcome = MutationController::new(&config, &workload, &verdicts)
            .run(&HostTarget::new("wp01"), &host, &set_debug())
            .await;

        assert_eq!(outcome.kind(), OutcomeKind::RollbackFailed);
        // The document itself was restored before the restart failed.
        assert_eq!(host.file(COMPOSE).as_deref(), Some(DOCUMENT));
    }

    #[tokio::test]
    async fn apply_failure_is_fatal_without_restore() {
        let host = site("wp01");
        let config = config();
        let workload = workload();
        let verdicts = FixedVerdict(HealthStatus::Healthy);
        let mutation = Mutation::DeleteSection {
            section: "volumes".to_string(),
        };
        let outcome = MutationController::new(&config, &workload, &verdicts)
            .run(&HostTarget::new("wp01"), &host, &mutation)
            .await;

        assert_eq!(outcome.kind(), OutcomeKind::Failed);
        assert_eq!(outcome.phase, MutationPhase::BackedUp);
        assert!(matches!(outcome.error, Some(MutationError::Apply(_))));
        assert!(outcome.backup.is_some());
        assert!(!host.commands().iter().any(|c| c.starts_with("docker compose")));
    }

    #[tokio::test]
    async fn backup_failure_leaves_host_untouched() {
        let host = wpfleet_remote::memory::MemoryHost::new("wp01");
        let config = config();
        let workload = workload();
        let verdicts = FixedVerdict(HealthStatus::Healthy);
        let outcome = MutationController::new(&config, &workload, &verdicts)
            .run(&HostTarget::new("wp01"), &host, &set_debug())
            .await;

        assert_eq!(outcome.phase, MutationPhase::Start);
        assert!(matches!(outcome.error, Some(MutationError::Backup(_))));
        assert!(host.paths().is_empty());
    }

    #[tokio::test]
    async fn everything_skipped_goes_straight_to_commit() {
        let host = site("wp01");
        let config = MutationConfig {
            skip_backup: true,
            skip_restart: true,
            skip_health_check: true,
            ..config()
        };
        let workload = workload();
        let verdicts = FixedVerdict(HealthStatus::Unhealthy);
        let outcome = MutationController::new(&config, &workload, &verdicts)
            .run(&HostTarget::new("wp01"), &host, &set_debug())
            .await;

        assert_eq!(outcome.kind(), OutcomeKind::Committed);
        assert!(outcome.backup.is_none());
        assert!(outcome.verdict.is_none());
        assert_eq!(host.paths(), vec![COMPOSE.to_string()]);
    }

    #[tokio::test]
    async fn degraded_and_unknown_still_commit() {
        for status in [HealthStatus::Degraded, HealthStatus::Unknown] {
            let host = site("wp01");
            let config = config();
            let workload = workload();
            let verdicts = FixedVerdict(status);
            let outcome = MutationController::new(&config, &workload, &verdicts)
                .run(&HostTarget::new("wp01"), &host, &set_debug())
                .await;
            assert_eq!(outcome.kind(), OutcomeKind::Committed, "{status}");
            assert_eq!(outcome.verdict.map(|v| v.status), Some(status));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn settle_delay_is_a_single_sleep() {
        let host = site("wp01");
        let config = MutationConfig {
            settle_delay: Duration::from_secs(10),
            ..config()
        };
        let workload = workload();
        let verdicts = FixedVerdict(HealthStatus::Healthy);
        let started = tokio::time::Instant::now();
        let outcome = MutationController::new(&config, &workload, &verdicts)
            .run(&HostTarget::new("wp01"), &host, &set_debug())
            .await;
        assert_eq!(outcome.kind(), OutcomeKind::Committed);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[test]
    fn skip_confirm_answers_yes() {
        let config = MutationConfig {
            skip_confirm: true,
            ..MutationConfig::default()
        };
        assert!(confirm_mutation(&config, &wpfleet_core::PresetAnswer(false), "go?").unwrap());
        assert!(!confirm_mutation(&MutationConfig::default(), &wpfleet_core::PresetAnswer(false), "go?").unwrap());
    }

    #[test]
    fn outcome_serializes_error_as_text() {
        let outcome = MutationOutcome::aborted(HostTarget::new("wp01"), "interrupted".to_string());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["error"], "aborted: interrupted");
        assert_eq!(json["phase"], "start");
        assert_eq!(json["duration_ms"], 0);
    }

    #[test]
    fn describe_renders_value() {
        assert_eq!(set_debug().describe(), "set services.wordpress.environment.WORDPRESS_DEBUG = '1'");
        assert_eq!(
            Mutation::DeleteSection { section: "volumes".into() }.describe(),
            "drop section volumes"
        );
    }
}
