// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The JSON configuration protocol consumed from external modules.
//!
//! A batch is a JSON object whose top-level keys are commands: `test`,
//! `rule`, `action`, `comp`, `instance`, `ready`, `email` and `result`.
//! Each command carries a fixed attribute set; an unknown attribute
//! aborts that command only, never the batch. Ordering between commands
//! does not matter because the engine resolves forward references.

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::probe::{ActionFn, ProbeFn};
use crate::types::{DiagResult, RuleOp, Severity, PERIOD_FAST_MS, PERIOD_NORMAL_MS, PERIOD_SLOW_MS};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error};

/// Handlers the module runner supplies for tests and actions created
/// through the protocol. Without them, protocol-created polled tests
/// yield Ignore and actions do nothing.
#[derive(Default, Clone)]
pub struct ModuleHandlers {
    /// Probe invoked for every polled test the module declares.
    pub probe: Option<ProbeFn>,
    /// Handler invoked for every action the module declares.
    pub action: Option<ActionFn>,
}

/// Outcome of applying one batch.
#[derive(Debug, Default, Clone)]
pub struct BatchReport {
    /// Commands applied.
    pub applied: usize,
    /// Commands dropped.
    pub failed: usize,
    /// One message per dropped command.
    pub errors: Vec<String>,
}

/// A command value may be a single object or an array of objects.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

/// `interval` accepts milliseconds or the built-in period names.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Interval {
    Millis(u64),
    Named(String),
}

impl Interval {
    fn period_ms(&self) -> Result<u64, String> {
        match self {
            Self::Millis(ms) if *ms > 0 => Ok(*ms),
            Self::Millis(_) => Err("interval must be non-zero".to_string()),
            Self::Named(name) => match name.as_str() {
                "fast" => Ok(PERIOD_FAST_MS),
                "normal" => Ok(PERIOD_NORMAL_MS),
                "slow" => Ok(PERIOD_SLOW_MS),
                other => Err(format!("unknown interval '{}'", other)),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TestCmd {
    name: String,
    #[serde(default)]
    polled: bool,
    interval: Option<Interval>,
    comp: Option<String>,
    description: Option<String>,
    health: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleCmd {
    name: String,
    input: String,
    action: Option<String>,
    comp: Option<String>,
    operator: Option<String>,
    #[serde(default)]
    n: i64,
    #[serde(default)]
    m: i64,
    description: Option<String>,
    severity: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ActionCmd {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CompCmd {
    name: String,
    parent: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InstanceCmd {
    name: String,
    object: String,
    #[serde(default)]
    delete: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResultCmd {
    test: String,
    instance: Option<String>,
    result: String,
    #[serde(default)]
    value: i64,
}

fn parse_operator(name: &str) -> Result<RuleOp, String> {
    match name {
        "SWDIAG_RULE_ON_FAIL" => Ok(RuleOp::OnFail),
        "SWDIAG_RULE_DISABLE" => Ok(RuleOp::Disable),
        "SWDIAG_RULE_EQUAL_TO_N" => Ok(RuleOp::EqualToN),
        "SWDIAG_RULE_NOT_EQUAL_TO_N" => Ok(RuleOp::NotEqualToN),
        "SWDIAG_RULE_LESS_THAN_N" => Ok(RuleOp::LessThanN),
        "SWDIAG_RULE_GREATER_THAN_N" => Ok(RuleOp::GreaterThanN),
        "SWDIAG_RULE_N_EVER" => Ok(RuleOp::NEver),
        "SWDIAG_RULE_N_IN_ROW" => Ok(RuleOp::NInRow),
        "SWDIAG_RULE_N_IN_M" => Ok(RuleOp::NInM),
        "SWDIAG_RULE_RANGE_N_TO_M" => Ok(RuleOp::RangeNToM),
        "SWDIAG_RULE_N_IN_TIME_M" => Ok(RuleOp::NInTimeM),
        "SWDIAG_RULE_FAIL_FOR_TIME_N" => Ok(RuleOp::FailForTimeN),
        "SWDIAG_RULE_OR" => Ok(RuleOp::Or),
        "SWDIAG_RULE_AND" => Ok(RuleOp::And),
        other => Err(format!("unknown operator '{}'", other)),
    }
}

fn parse_severity(name: &str) -> Result<Severity, String> {
    match name {
        "SWDIAG_SEVERITY_CATASTROPHIC" => Ok(Severity::Catastrophic),
        "SWDIAG_SEVERITY_CRITICAL" => Ok(Severity::Critical),
        "SWDIAG_SEVERITY_HIGH" => Ok(Severity::High),
        "SWDIAG_SEVERITY_MEDIUM" => Ok(Severity::Medium),
        "SWDIAG_SEVERITY_LOW" => Ok(Severity::Low),
        "SWDIAG_SEVERITY_NONE" => Ok(Severity::None),
        "SWDIAG_SEVERITY_POSITIVE" => Ok(Severity::Positive),
        other => Err(format!("unknown severity '{}'", other)),
    }
}

fn parse_result(name: &str, value: i64) -> Result<DiagResult, String> {
    match name {
        "pass" => Ok(DiagResult::Pass),
        "fail" => Ok(DiagResult::Fail),
        "ignore" => Ok(DiagResult::Ignore),
        "value" => Ok(DiagResult::Value(value)),
        other => Err(format!("unknown result '{}'", other)),
    }
}

/// Apply a configuration batch on behalf of a module. Commands are
/// applied independently; the report lists each dropped command.
pub fn apply_batch(
    engine: &Engine,
    module: &str,
    json: &str,
    handlers: &ModuleHandlers,
) -> EngineResult<BatchReport> {
    let root: Value = serde_json::from_str(json).map_err(|err| EngineError::Config {
        command: "batch".to_string(),
        reason: err.to_string(),
    })?;
    let Value::Object(map) = root else {
        return Err(EngineError::Config {
            command: "batch".to_string(),
            reason: "top level must be an object".to_string(),
        });
    };

    let mut report = BatchReport::default();
    for (key, value) in map {
        let outcome = match key.as_str() {
            "test" => apply_many::<TestCmd>(value, &mut report, |cmd| {
                apply_test(engine, handlers, cmd)
            }),
            "rule" => apply_many::<RuleCmd>(value, &mut report, |cmd| apply_rule(engine, cmd)),
            "action" => apply_many::<ActionCmd>(value, &mut report, |cmd| {
                apply_action(engine, handlers, cmd)
            }),
            "comp" => apply_many::<CompCmd>(value, &mut report, |cmd| apply_comp(engine, cmd)),
            "instance" => {
                apply_many::<InstanceCmd>(value, &mut report, |cmd| apply_instance(engine, cmd))
            }
            "ready" => apply_ready(engine, value, &mut report),
            "email" => apply_email(engine, value, &mut report),
            "result" => {
                apply_many::<ResultCmd>(value, &mut report, |cmd| apply_result(engine, cmd))
            }
            other => {
                record(&mut report, format!("unknown command '{}'", other));
                Ok(())
            }
        };
        if let Err(reason) = outcome {
            error!(module, command = %key, %reason, "configuration command dropped");
        }
    }

    debug!(
        module,
        applied = report.applied,
        failed = report.failed,
        "configuration batch applied"
    );
    Ok(report)
}

fn record(report: &mut BatchReport, reason: String) {
    report.failed += 1;
    report.errors.push(reason);
}

fn apply_many<T: serde::de::DeserializeOwned>(
    value: Value,
    report: &mut BatchReport,
    mut apply: impl FnMut(T) -> Result<(), String>,
) -> Result<(), String> {
    let parsed: OneOrMany<T> = match serde_json::from_value(value) {
        Ok(parsed) => parsed,
        Err(err) => {
            record(report, err.to_string());
            return Err(err.to_string());
        }
    };
    for cmd in parsed.into_vec() {
        match apply(cmd) {
            Ok(()) => report.applied += 1,
            Err(reason) => {
                record(report, reason.clone());
                error!(%reason, "configuration command dropped");
            }
        }
    }
    Ok(())
}

fn apply_test(engine: &Engine, handlers: &ModuleHandlers, cmd: TestCmd) -> Result<(), String> {
    if let Some(comp) = &cmd.health {
        engine
            .test_create_comp_health(&cmd.name, comp)
            .map_err(|e| e.to_string())?;
    } else if cmd.polled {
        let period = cmd
            .interval
            .as_ref()
            .map(Interval::period_ms)
            .transpose()?
            .unwrap_or(PERIOD_NORMAL_MS);
        let probe = handlers.probe.clone().unwrap_or_else(|| {
            crate::probe::probe_fn(|_, _| DiagResult::Ignore)
        });
        engine
            .test_create_polled(&cmd.name, probe, None, period)
            .map_err(|e| e.to_string())?;
    } else {
        engine
            .test_create_notification(&cmd.name)
            .map_err(|e| e.to_string())?;
    }

    if let Some(comp) = &cmd.comp {
        engine
            .comp_contains(comp, &cmd.name)
            .map_err(|e| e.to_string())?;
    }
    if let Some(description) = &cmd.description {
        engine
            .test_set_description(&cmd.name, description)
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn apply_rule(engine: &Engine, cmd: RuleCmd) -> Result<(), String> {
    // Validate the whole command before touching the registry so a bad
    // attribute drops the command without side effects.
    let op = cmd.operator.as_deref().map(parse_operator).transpose()?;
    let severity = cmd.severity.as_deref().map(parse_severity).transpose()?;

    let action = cmd.action.as_deref().unwrap_or(crate::builtin::ACTION_NOOP);
    engine
        .rule_create(&cmd.name, &cmd.input, action)
        .map_err(|e| e.to_string())?;

    if let Some(op) = op {
        engine
            .rule_set_type(&cmd.name, op, cmd.n, cmd.m)
            .map_err(|e| e.to_string())?;
    }
    if let Some(severity) = severity {
        engine
            .rule_set_severity(&cmd.name, severity)
            .map_err(|e| e.to_string())?;
    }
    // `comp` and `description` are distinct attributes and applied
    // independently.
    if let Some(comp) = &cmd.comp {
        engine
            .comp_contains(comp, &cmd.name)
            .map_err(|e| e.to_string())?;
    }
    if let Some(description) = &cmd.description {
        engine
            .rule_set_description(&cmd.name, description)
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn apply_action(engine: &Engine, handlers: &ModuleHandlers, cmd: ActionCmd) -> Result<(), String> {
    let handler = handlers.action.clone().unwrap_or_else(|| {
        crate::probe::action_fn(|_, _| DiagResult::Pass)
    });
    engine
        .action_create(&cmd.name, handler, None)
        .map_err(|e| e.to_string())
}

fn apply_comp(engine: &Engine, cmd: CompCmd) -> Result<(), String> {
    engine.comp_create(&cmd.name).map_err(|e| e.to_string())?;
    if let Some(parent) = &cmd.parent {
        engine
            .comp_contains(parent, &cmd.name)
            .map_err(|e| e.to_string())?;
    }
    Ok(())
}

fn apply_instance(engine: &Engine, cmd: InstanceCmd) -> Result<(), String> {
    if cmd.delete {
        engine
            .instance_delete(&cmd.object, &cmd.name)
            .map_err(|e| e.to_string())
    } else {
        engine
            .instance_create(&cmd.object, &cmd.name, None)
            .map_err(|e| e.to_string())
    }
}

fn apply_ready(engine: &Engine, value: Value, report: &mut BatchReport) -> Result<(), String> {
    let names: Vec<String> = match serde_json::from_value(value) {
        Ok(names) => names,
        Err(err) => {
            record(report, err.to_string());
            return Err(err.to_string());
        }
    };
    for name in names {
        match engine.test_chain_ready(&name) {
            Ok(()) => report.applied += 1,
            Err(err) => record(report, err.to_string()),
        }
    }
    Ok(())
}

fn apply_email(engine: &Engine, value: Value, report: &mut BatchReport) -> Result<(), String> {
    let address: String = match serde_json::from_value(value) {
        Ok(address) => address,
        Err(err) => {
            record(report, err.to_string());
            return Err(err.to_string());
        }
    };
    engine.set_alert_recipient(Some(address));
    report.applied += 1;
    Ok(())
}

fn apply_result(engine: &Engine, cmd: ResultCmd) -> Result<(), String> {
    let result = parse_result(&cmd.result, cmd.value)?;
    engine
        .notify(&cmd.test, cmd.instance.as_deref(), result)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::types::ObjKind;

    fn engine() -> Engine {
        Engine::with_config(EngineConfig {
            internal_diagnostics: false,
            ..Default::default()
        })
    }

    #[test]
    fn test_full_batch() {
        let engine = engine();
        let batch = r#"{
            "comp": {"name": "Power"},
            "test": {"name": "fan-speed", "polled": true, "interval": "fast",
                     "comp": "Power", "description": "fan tachometer"},
            "action": {"name": "fan-reset"},
            "rule": {"name": "fan-low", "input": "fan-speed", "action": "fan-reset",
                     "operator": "SWDIAG_RULE_LESS_THAN_N", "n": 1000,
                     "severity": "SWDIAG_SEVERITY_HIGH", "comp": "Power"},
            "ready": ["fan-speed"]
        }"#;

        let report = apply_batch(&engine, "mod", batch, &ModuleHandlers::default()).unwrap();
        assert_eq!(report.failed, 0, "errors: {:?}", report.errors);
        assert_eq!(report.applied, 5);

        let snap = engine
            .object_snapshot(ObjKind::Test, "fan-speed")
            .expect("test exists");
        assert_eq!(snap.description, "fan tachometer");
        assert_eq!(
            snap.instances[0].state,
            crate::types::ObjState::Enabled,
            "ready enabled the chain"
        );

        let comp = engine.component_snapshot("Power").expect("comp exists");
        assert!(comp.members.contains(&"fan-speed".to_string()));
        assert!(comp.members.contains(&"fan-low".to_string()));

        engine.shutdown();
    }

    #[test]
    fn test_unknown_attribute_aborts_command_not_batch() {
        let engine = engine();
        let batch = r#"{
            "test": {"name": "bad", "polled": false, "bogus": 1},
            "comp": {"name": "Power"}
        }"#;

        let report = apply_batch(&engine, "mod", batch, &ModuleHandlers::default()).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.applied, 1);
        assert!(engine.object_snapshot(ObjKind::Test, "bad").is_none());
        assert!(engine.component_snapshot("Power").is_some());

        engine.shutdown();
    }

    #[test]
    fn test_command_arrays() {
        let engine = engine();
        let batch = r#"{
            "test": [
                {"name": "a", "polled": false},
                {"name": "b", "polled": false}
            ]
        }"#;

        let report = apply_batch(&engine, "mod", batch, &ModuleHandlers::default()).unwrap();
        assert_eq!(report.applied, 2);
        assert!(engine.object_snapshot(ObjKind::Test, "a").is_some());
        assert!(engine.object_snapshot(ObjKind::Test, "b").is_some());

        engine.shutdown();
    }

    #[test]
    fn test_result_command_notifies() {
        let engine = engine();
        let setup = r#"{"test": {"name": "t", "polled": false}, "ready": ["t"]}"#;
        apply_batch(&engine, "mod", setup, &ModuleHandlers::default()).unwrap();

        let batch = r#"{"result": {"test": "t", "result": "fail"}}"#;
        let report = apply_batch(&engine, "mod", batch, &ModuleHandlers::default()).unwrap();
        assert_eq!(report.failed, 0);

        let snap = engine.object_snapshot(ObjKind::Test, "t").unwrap();
        assert_eq!(snap.instances[0].last_result, Some(DiagResult::Fail));

        engine.shutdown();
    }

    #[test]
    fn test_bad_operator_drops_rule_only() {
        let engine = engine();
        let batch = r#"{
            "rule": {"name": "r", "input": "t", "operator": "SWDIAG_RULE_SOMETIMES"},
            "email": "oncall@example.net"
        }"#;

        let report = apply_batch(&engine, "mod", batch, &ModuleHandlers::default()).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.applied, 1);

        engine.shutdown();
    }

    #[test]
    fn test_malformed_batch_rejected() {
        let engine = engine();
        assert!(apply_batch(&engine, "mod", "[1,2]", &ModuleHandlers::default()).is_err());
        assert!(apply_batch(&engine, "mod", "not json", &ModuleHandlers::default()).is_err());
        engine.shutdown();
    }
}
