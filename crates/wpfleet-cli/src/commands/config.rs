//! `wpfleet config`: read and change compose-file values across hosts.

use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Subcommand;
use serde::Serialize;
use serde_json::json;
use tabled::Tabled;

use wpfleet_core::{HostTarget, PresetValue, ValueSource};
use wpfleet_health::{HealthEngine, HealthOptions};
use wpfleet_remote::{RemoteConfigStore, Transport, Value, parse_value};
use wpfleet_rollout::{
    BatchSummary, FanOutResult, FleetMutation, Mutation, MutationOutcome, OutcomeKind,
    confirm_mutation,
};

use super::{Fleet, MutationFlags};
use crate::output::{OutputFormat, print_json, print_summary, print_table, truncate};
use crate::prompt::{TerminalConfirmer, TerminalValue};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Read a value on every host
    Get {
        /// Host range, e.g. "wp%02d.example.com:1-20:!7"
        range: String,
        /// Dotted section path, e.g. "services.wordpress"
        section: String,
        /// Dotted key inside the section, e.g. "environment.WP_DEBUG"
        key: String,
    },
    /// Set a value on every host (prompted when omitted)
    Set {
        range: String,
        section: String,
        key: String,
        /// YAML scalar or flow value; `8080`, `true` and `[a, b]` keep their types
        value: Option<String>,
        #[command(flatten)]
        flags: MutationFlags,
    },
    /// Remove a key on every host
    Unset {
        range: String,
        section: String,
        key: String,
        #[command(flatten)]
        flags: MutationFlags,
    },
    /// Remove a whole section on every host
    DropSection {
        range: String,
        section: String,
        #[command(flatten)]
        flags: MutationFlags,
    },
}

pub async fn execute(command: ConfigCommands, fleet: &Fleet) -> Result<bool> {
    if fleet.format == OutputFormat::Prometheus {
        bail!("prometheus output is only available for `health`");
    }
    match command {
        ConfigCommands::Get {
            range,
            section,
            key,
        } => {
            let targets = fleet.targets(&range)?;
            let rows = get_values(fleet, targets, &section, &key).await;
            let ok = rows.iter().all(|r| r.error.is_none());
            match fleet.format {
                OutputFormat::Json => print_json(&rows)?,
                _ => print_table(rows),
            }
            Ok(ok)
        }
        ConfigCommands::Set {
            range,
            section,
            key,
            value,
            flags,
        } => {
            let preset = PresetValue(value);
            let source: &dyn ValueSource = if preset.0.is_some() {
                &preset
            } else {
                &TerminalValue
            };
            let raw = source.value(&format!("value for {section}.{key}"))?;
            let mutation = Mutation::SetValue {
                section,
                key,
                value: parse_value(&raw),
            };
            mutate(fleet, &range, mutation, &flags).await
        }
        ConfigCommands::Unset {
            range,
            section,
            key,
            flags,
        } => mutate(fleet, &range, Mutation::DeleteKey { section, key }, &flags).await,
        ConfigCommands::DropSection {
            range,
            section,
            flags,
        } => mutate(fleet, &range, Mutation::DeleteSection { section }, &flags).await,
    }
}

#[derive(Debug, Serialize, Tabled)]
pub struct ValueRow {
    pub host: String,
    #[tabled(display_with = "yaml_cell")]
    pub value: Option<Value>,
    #[tabled(display_with = "text_cell")]
    pub error: Option<String>,
}

impl FanOutResult for ValueRow {
    fn aborted(target: HostTarget, reason: String) -> Self {
        Self {
            host: target.to_string(),
            value: None,
            error: Some(reason),
        }
    }
}

fn yaml_cell(value: &Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(v) => serde_yaml::to_string(v)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
        None => String::new(),
    }
}

fn text_cell(text: &Option<String>) -> String {
    text.as_deref().map(|t| truncate(t, 80)).unwrap_or_default()
}

pub async fn get_values(
    fleet: &Fleet,
    targets: Vec<HostTarget>,
    section: &str,
    key: &str,
) -> Vec<ValueRow> {
    let transport = fleet.transport();
    let compose_file = fleet.workload().compose_file().to_string();
    let section = section.to_string();
    let key = key.to_string();

    let mut rows = fleet
        .executor()
        .run(targets, move |target| {
            let transport = Arc::clone(&transport);
            let compose_file = compose_file.clone();
            let section = section.clone();
            let key = key.clone();
            async move { get_one(&*transport, target, &compose_file, &section, &key).await }
        })
        .await;
    rows.sort_by(|a, b| a.host.cmp(&b.host));
    rows
}

async fn get_one(
    transport: &dyn Transport,
    target: HostTarget,
    compose_file: &str,
    section: &str,
    key: &str,
) -> ValueRow {
    let conn = match transport.connect(&target).await {
        Ok(conn) => conn,
        Err(e) => return ValueRow::aborted(target, e.to_string()),
    };
    let result = RemoteConfigStore::new(&*conn, compose_file)
        .get_value(section, key)
        .await;
    conn.close().await;

    match result {
        Ok(value) => ValueRow {
            host: target.to_string(),
            value: Some(value),
            error: None,
        },
        Err(e) => ValueRow::aborted(target, e.to_string()),
    }
}

async fn mutate(fleet: &Fleet, range: &str, mutation: Mutation, flags: &MutationFlags) -> Result<bool> {
    let targets = fleet.targets(range)?;
    let config = flags.apply(fleet.config.mutation_config()?)?;

    let prompt = format!("{} on {} host(s)?", mutation.describe(), targets.len());
    if !confirm_mutation(&config, &TerminalConfirmer, &prompt)? {
        print_summary("Aborted, no host was changed");
        return Ok(true);
    }

    let options = HealthOptions {
        timeout: config.health_timeout,
        ..HealthOptions::from_config(&fleet.config)?
    };
    let job = Arc::new(FleetMutation {
        transport: fleet.transport(),
        verdicts: Arc::new(HealthEngine::new(options)),
        workload: fleet.workload(),
        config,
        mutation,
    });

    let outcomes = run_mutation(fleet, job, targets).await;
    report_outcomes(fleet.format, outcomes)
}

pub async fn run_mutation(
    fleet: &Fleet,
    job: Arc<FleetMutation>,
    targets: Vec<HostTarget>,
) -> Vec<MutationOutcome> {
    let mut outcomes = fleet
        .executor()
        .run(targets, move |target| {
            let job = Arc::clone(&job);
            async move { job.run_one(target).await }
        })
        .await;
    outcomes.sort_by(|a, b| a.target.cmp(&b.target));
    outcomes
}

#[derive(Tabled)]
struct OutcomeRow {
    host: String,
    result: &'static str,
    phase: String,
    backup: String,
    detail: String,
}

fn outcome_row(outcome: &MutationOutcome) -> OutcomeRow {
    let result = match outcome.kind() {
        OutcomeKind::Committed => "committed",
        OutcomeKind::RolledBack => "rolled back",
        OutcomeKind::Failed => "failed",
        OutcomeKind::RollbackFailed => "ROLLBACK FAILED",
    };
    let detail = match (&outcome.error, &outcome.verdict) {
        (Some(e), _) => e.to_string(),
        (None, Some(v)) if !v.warnings.is_empty() => v.warnings.join("; "),
        _ => String::new(),
    };
    OutcomeRow {
        host: outcome.target.to_string(),
        result,
        phase: format!("{:?}", outcome.phase),
        backup: outcome
            .backup
            .as_ref()
            .map(|b| b.path.clone())
            .unwrap_or_default(),
        detail: truncate(&detail, 100),
    }
}

fn report_outcomes(format: OutputFormat, outcomes: Vec<MutationOutcome>) -> Result<bool> {
    let summary = BatchSummary::from_outcomes(&outcomes);
    match format {
        OutputFormat::Json => print_json(&json!({ "summary": summary, "outcomes": outcomes }))?,
        _ => print_table(outcomes.iter().map(outcome_row).collect()),
    }
    print_summary(&summary.to_string());
    Ok(summary.all_committed())
}
