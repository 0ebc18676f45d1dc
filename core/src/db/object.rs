// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Object records: a tagged variant over a common header.
//!
//! Forward references are represented by a variant-less stub carrying
//! only the name and state Allocated; the stub is upgraded in place when
//! the real object is created. All graph edges are stored as pairs of
//! arena handles, never ownership.

use crate::db::instance::{Instance, InstanceKey};
use crate::probe::{ActionFn, ProbeContext, ProbeFn};
use crate::types::{DiagResult, ObjFlags, ObjKind, ObjState, RuleOp, Severity};

/// Stable handle into the object arena. Slots are never reused, so a
/// handle stays valid (resolving to None) after deletion.
pub type ObjId = usize;

/// What a test is and how it produces results.
#[derive(Clone)]
pub enum TestKind {
    /// Executed by the scheduler on a period.
    Polled {
        /// Polling period in milliseconds.
        period_ms: u64,
        /// Host probe; absent probes yield Ignore with a log.
        probe: Option<ProbeFn>,
    },
    /// Results arrive through `notify`.
    Notification {
        /// Auto-pass delay after a Fail, if set.
        autopass_ms: Option<u64>,
    },
    /// Reads the observed component's health on each poll.
    CompHealth {
        /// Handle of the observed component.
        comp: ObjId,
    },
}

impl std::fmt::Debug for TestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Polled { period_ms, probe } => f
                .debug_struct("Polled")
                .field("period_ms", period_ms)
                .field("probe", &probe.is_some())
                .finish(),
            Self::Notification { autopass_ms } => f
                .debug_struct("Notification")
                .field("autopass_ms", autopass_ms)
                .finish(),
            Self::CompHealth { comp } => {
                f.debug_struct("CompHealth").field("comp", comp).finish()
            }
        }
    }
}

/// Test payload.
#[derive(Debug, Clone)]
pub struct TestData {
    /// Flavour of the test.
    pub kind: TestKind,
}

/// Rule payload.
#[derive(Debug, Clone)]
pub struct RuleData {
    /// Operator applied to the gathered inputs.
    pub op: RuleOp,
    /// First operand.
    pub n: i64,
    /// Second operand.
    pub m: i64,
    /// Health impact on the owning components.
    pub severity: Severity,
    /// Ordered input objects (tests or rules).
    pub inputs: Vec<ObjId>,
    /// Actions dispatched when this rule triggers.
    pub actions: Vec<ObjId>,
    /// Loop domain shared by rules collapsed out of a dependency cycle.
    pub loop_domain: Option<u64>,
}

impl Default for RuleData {
    fn default() -> Self {
        Self {
            op: RuleOp::OnFail,
            n: 0,
            m: 0,
            severity: Severity::None,
            inputs: Vec::new(),
            actions: Vec::new(),
            loop_domain: None,
        }
    }
}

/// How an action is carried out.
#[derive(Clone)]
pub enum ActionHandler {
    /// Host-supplied callable.
    Host(ActionFn),
    /// One of the reserved platform actions; resolution is deferred to
    /// the host's registered platform hooks.
    Builtin(&'static str),
    /// Raise a user-visible alert with the given text.
    UserAlert(String),
}

impl std::fmt::Debug for ActionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host(_) => write!(f, "Host"),
            Self::Builtin(name) => write!(f, "Builtin({})", name),
            Self::UserAlert(text) => write!(f, "UserAlert({:?})", text),
        }
    }
}

/// Action payload.
#[derive(Debug, Clone, Default)]
pub struct ActionData {
    /// Handler; stubs upgraded by a rule reference have none until
    /// configured.
    pub handler: Option<ActionHandler>,
}

/// Running tallies of rule failures per severity bucket.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct SeverityTally {
    /// Catastrophic failures currently standing.
    pub catastrophic: u32,
    /// Critical failures currently standing.
    pub critical: u32,
    /// High failures currently standing.
    pub high: u32,
    /// Medium failures currently standing.
    pub medium: u32,
    /// Low failures currently standing.
    pub low: u32,
    /// Positive rules currently failing.
    pub positive: u32,
}

impl SeverityTally {
    /// Adjust the bucket for a severity by +1 or -1.
    pub fn shift(&mut self, severity: Severity, up: bool) {
        let bucket = match severity {
            Severity::Catastrophic => &mut self.catastrophic,
            Severity::Critical => &mut self.critical,
            Severity::High => &mut self.high,
            Severity::Medium => &mut self.medium,
            Severity::Low => &mut self.low,
            Severity::Positive => &mut self.positive,
            Severity::None => return,
        };
        if up {
            *bucket += 1;
        } else {
            *bucket = bucket.saturating_sub(1);
        }
    }
}

/// Component payload.
#[derive(Debug, Clone)]
pub struct CompData {
    /// Contained objects.
    pub members: Vec<ObjId>,
    /// Current health, clamped to [0, 1000].
    pub health: i64,
    /// Confidence in the health figure, [0, 1000].
    pub confidence: i64,
    /// Standing failures per severity bucket.
    pub tally: SeverityTally,
}

impl Default for CompData {
    fn default() -> Self {
        Self {
            members: Vec::new(),
            health: crate::types::HEALTH_MAX,
            confidence: crate::types::HEALTH_MAX,
            tally: SeverityTally::default(),
        }
    }
}

/// Kind-specific payload.
#[derive(Debug, Clone)]
pub enum ObjVariant {
    /// Forward-reference stub awaiting upgrade.
    Stub,
    /// Test payload.
    Test(TestData),
    /// Rule payload.
    Rule(RuleData),
    /// Action payload.
    Action(ActionData),
    /// Component payload.
    Component(CompData),
}

/// A registered entity: common header plus kind payload.
#[derive(Debug, Clone)]
pub struct Object {
    /// Arena handle.
    pub id: ObjId,
    /// Unique name within the kind.
    pub name: String,
    /// Informational description.
    pub description: String,
    /// State applied by the chain-ready walk.
    pub default_state: ObjState,
    /// Location and trigger flag mask.
    pub flags: ObjFlags,
    /// Base instance; carries the object's own state.
    pub base: Instance,
    /// Named sub-instances.
    pub instances: Vec<Instance>,
    /// Components containing this object.
    pub member_of: Vec<ObjId>,
    /// Rules consuming this object as an input.
    pub consumers: Vec<ObjId>,
    /// Dependency children (this object is the parent).
    pub depend_children: Vec<ObjId>,
    /// Dependency parents (this object is the child).
    pub depend_parents: Vec<ObjId>,
    /// Kind payload.
    pub variant: ObjVariant,
}

impl Object {
    /// New stub in state Allocated.
    pub fn stub(id: ObjId, name: String) -> Self {
        Self {
            id,
            name,
            description: String::new(),
            default_state: ObjState::Enabled,
            flags: ObjFlags::LOCATION_ALL,
            base: Instance::new(None, ObjState::Allocated),
            instances: Vec::new(),
            member_of: Vec::new(),
            consumers: Vec::new(),
            depend_children: Vec::new(),
            depend_parents: Vec::new(),
            variant: ObjVariant::Stub,
        }
    }

    /// Kind derived from the payload.
    pub fn kind(&self) -> ObjKind {
        match self.variant {
            ObjVariant::Stub => ObjKind::Any,
            ObjVariant::Test(_) => ObjKind::Test,
            ObjVariant::Rule(_) => ObjKind::Rule,
            ObjVariant::Action(_) => ObjKind::Action,
            ObjVariant::Component(_) => ObjKind::Component,
        }
    }

    /// Object-level state (the base instance's state).
    pub fn state(&self) -> ObjState {
        self.base.state
    }

    /// True when the base instance is enabled.
    pub fn is_enabled(&self) -> bool {
        self.base.state == ObjState::Enabled
    }

    /// Look up an instance by key; falls back to the base for unknown
    /// names so identically-instanced chains degrade gracefully.
    pub fn instance(&self, key: &InstanceKey) -> &Instance {
        match key {
            None => &self.base,
            Some(name) => self
                .instances
                .iter()
                .find(|i| i.name.as_deref() == Some(name.as_str()))
                .unwrap_or(&self.base),
        }
    }

    /// Mutable variant of [`Object::instance`].
    pub fn instance_mut(&mut self, key: &InstanceKey) -> &mut Instance {
        match key {
            None => &mut self.base,
            Some(name) => {
                let pos = self
                    .instances
                    .iter()
                    .position(|i| i.name.as_deref() == Some(name.as_str()));
                match pos {
                    Some(p) => &mut self.instances[p],
                    None => &mut self.base,
                }
            }
        }
    }

    /// Whether a sub-instance with this exact name exists.
    pub fn has_instance(&self, name: &str) -> bool {
        self.instances
            .iter()
            .any(|i| i.name.as_deref() == Some(name))
    }

    /// Resolve the instance key a paired child should evaluate for a
    /// parent event on `origin`: same-named instances pair, anything
    /// else lands on the base.
    pub fn pair_key(&self, origin: &InstanceKey) -> InstanceKey {
        match origin {
            Some(name) if self.has_instance(name) => Some(name.clone()),
            _ => None,
        }
    }

    /// Iterate the base instance and every sub-instance.
    pub fn all_instances(&self) -> impl Iterator<Item = &Instance> {
        std::iter::once(&self.base).chain(self.instances.iter())
    }

    /// Mutable iteration over the base instance and every sub-instance.
    pub fn all_instances_mut(&mut self) -> impl Iterator<Item = &mut Instance> {
        std::iter::once(&mut self.base).chain(self.instances.iter_mut())
    }

    /// Test payload accessor.
    pub fn as_test(&self) -> Option<&TestData> {
        match &self.variant {
            ObjVariant::Test(t) => Some(t),
            _ => None,
        }
    }

    /// Mutable test payload accessor.
    pub fn as_test_mut(&mut self) -> Option<&mut TestData> {
        match &mut self.variant {
            ObjVariant::Test(t) => Some(t),
            _ => None,
        }
    }

    /// Rule payload accessor.
    pub fn as_rule(&self) -> Option<&RuleData> {
        match &self.variant {
            ObjVariant::Rule(r) => Some(r),
            _ => None,
        }
    }

    /// Mutable rule payload accessor.
    pub fn as_rule_mut(&mut self) -> Option<&mut RuleData> {
        match &mut self.variant {
            ObjVariant::Rule(r) => Some(r),
            _ => None,
        }
    }

    /// Action payload accessor.
    pub fn as_action(&self) -> Option<&ActionData> {
        match &self.variant {
            ObjVariant::Action(a) => Some(a),
            _ => None,
        }
    }

    /// Mutable action payload accessor.
    pub fn as_action_mut(&mut self) -> Option<&mut ActionData> {
        match &mut self.variant {
            ObjVariant::Action(a) => Some(a),
            _ => None,
        }
    }

    /// Component payload accessor.
    pub fn as_comp(&self) -> Option<&CompData> {
        match &self.variant {
            ObjVariant::Component(c) => Some(c),
            _ => None,
        }
    }

    /// Mutable component payload accessor.
    pub fn as_comp_mut(&mut self) -> Option<&mut CompData> {
        match &mut self.variant {
            ObjVariant::Component(c) => Some(c),
            _ => None,
        }
    }

    /// Create a sub-instance replicating the template's default state.
    /// Replaces any existing instance with the same name.
    pub fn add_instance(&mut self, name: String, context: Option<ProbeContext>) {
        self.instances
            .retain(|i| i.name.as_deref() != Some(name.as_str()));
        let mut instance = Instance::new(Some(name), self.base.state);
        instance.context = context;
        self.instances.push(instance);
    }

    /// Remove a sub-instance by name; returns whether one was removed.
    pub fn remove_instance(&mut self, name: &str) -> bool {
        let before = self.instances.len();
        self.instances.retain(|i| i.name.as_deref() != Some(name));
        self.instances.len() != before
    }

    /// Most recent conclusive result of the paired instance, aggregated
    /// across sub-instances when the consumer has none of its own: any
    /// failing instance makes the aggregate Fail.
    pub fn gathered_result(&self, key: &InstanceKey) -> Option<DiagResult> {
        match key {
            Some(name) if self.has_instance(name) => self.instance(key).last_result,
            _ => {
                if self.instances.iter().any(|i| i.is_failing()) {
                    Some(DiagResult::Fail)
                } else {
                    self.base.last_result
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_upgrade_path() {
        let mut obj = Object::stub(0, "fan".to_string());
        assert_eq!(obj.kind(), ObjKind::Any);
        assert_eq!(obj.state(), ObjState::Allocated);

        obj.variant = ObjVariant::Rule(RuleData::default());
        assert_eq!(obj.kind(), ObjKind::Rule);
    }

    #[test]
    fn test_instance_pairing_falls_back_to_base() {
        let mut obj = Object::stub(0, "port".to_string());
        obj.add_instance("eth0".to_string(), None);

        assert!(obj.has_instance("eth0"));
        assert_eq!(obj.pair_key(&Some("eth0".to_string())), Some("eth0".to_string()));
        assert_eq!(obj.pair_key(&Some("eth9".to_string())), None);
        assert_eq!(obj.pair_key(&None), None);
    }

    #[test]
    fn test_gathered_result_aggregates_instances() {
        let mut obj = Object::stub(0, "port".to_string());
        obj.base.set_result(DiagResult::Pass);
        obj.add_instance("eth0".to_string(), None);
        obj.add_instance("eth1".to_string(), None);

        assert_eq!(obj.gathered_result(&None), Some(DiagResult::Pass));

        obj.instance_mut(&Some("eth1".to_string()))
            .set_result(DiagResult::Fail);
        assert_eq!(obj.gathered_result(&None), Some(DiagResult::Fail));
        assert_eq!(
            obj.gathered_result(&Some("eth0".to_string())),
            None,
            "eth0 has not produced a result yet"
        );
    }

    #[test]
    fn test_severity_tally_shift() {
        let mut tally = SeverityTally::default();
        tally.shift(Severity::Critical, true);
        tally.shift(Severity::Critical, true);
        tally.shift(Severity::Critical, false);
        assert_eq!(tally.critical, 1);
        tally.shift(Severity::None, true);
        assert_eq!(tally.critical, 1);
    }
}
