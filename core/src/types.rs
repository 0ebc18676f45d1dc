// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Core value types shared across the engine: probe results, rule
//! operators, severities, object kinds/states and flag masks.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

/// Maximum object name length; longer names are truncated.
pub const MAX_NAME_LEN: usize = 31;

/// Maximum description length; longer descriptions are truncated.
pub const MAX_DESC_LEN: usize = 1024;

/// Built-in fast polling period (1 minute).
pub const PERIOD_FAST_MS: u64 = 1000 * 60;

/// Built-in normal polling period (5 minutes).
pub const PERIOD_NORMAL_MS: u64 = 1000 * 60 * 5;

/// Built-in slow polling period (30 minutes).
pub const PERIOD_SLOW_MS: u64 = 1000 * 60 * 30;

/// Upper bound of the component health range. Divide by 10 for percent.
pub const HEALTH_MAX: i64 = 1000;

/// Outcome of a probe, rule evaluation or recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagResult {
    /// The subject passed.
    Pass,
    /// The subject failed.
    Fail,
    /// The probe produced a value for a rule to interpret.
    Value(i64),
    /// Completion will arrive later through `notify`/`action_complete`.
    InProgress,
    /// The run could not complete; excluded from rule evaluation.
    Abort,
    /// The result carries no signal; excluded from rule evaluation.
    Ignore,
}

impl DiagResult {
    /// True when this result feeds rule evaluation (Pass, Fail or Value).
    pub fn is_conclusive(self) -> bool {
        matches!(self, Self::Pass | Self::Fail | Self::Value(_))
    }

    /// True for results that must not be counted in rule evaluation.
    pub fn is_excluded(self) -> bool {
        matches!(self, Self::Abort | Self::Ignore)
    }

    /// The numeric payload a value-consuming operator sees: 0 for Pass,
    /// the carried value for Value.
    pub fn value(self) -> i64 {
        match self {
            Self::Value(v) => v,
            _ => 0,
        }
    }

    /// Compare by result kind, disregarding any carried value.
    pub fn kind_eq(self, other: Self) -> bool {
        std::mem::discriminant(&self) == std::mem::discriminant(&other)
    }
}

impl fmt::Display for DiagResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::Value(v) => write!(f, "value({})", v),
            Self::InProgress => write!(f, "in-progress"),
            Self::Abort => write!(f, "abort"),
            Self::Ignore => write!(f, "ignore"),
        }
    }
}

/// The four registrable entity kinds, plus the kindless stub used for
/// forward references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjKind {
    /// Forward-reference stub; upgraded in place on real creation.
    Any,
    /// Executable probe.
    Test,
    /// Predicate over test/rule outputs.
    Rule,
    /// Recovery procedure.
    Action,
    /// Grouping with an aggregated health score.
    Component,
}

impl fmt::Display for ObjKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::Test => write!(f, "test"),
            Self::Rule => write!(f, "rule"),
            Self::Action => write!(f, "action"),
            Self::Component => write!(f, "component"),
        }
    }
}

/// Object lifecycle state. Only Enabled objects participate in
/// scheduling and evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjState {
    /// Stub created by a forward reference.
    Allocated,
    /// Storage initialised but not yet configured.
    Initialized,
    /// Fully configured, not yet participating.
    Created,
    /// Participating in scheduling and evaluation.
    Enabled,
    /// Explicitly withdrawn from evaluation.
    Disabled,
    /// Torn down; transient.
    Deleted,
}

impl fmt::Display for ObjState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocated => write!(f, "allocated"),
            Self::Initialized => write!(f, "initialized"),
            Self::Created => write!(f, "created"),
            Self::Enabled => write!(f, "enabled"),
            Self::Disabled => write!(f, "disabled"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// Health impact of a failing rule, in health units out of 1000.
///
/// `Positive` marks a rule whose passing offsets damage from other
/// failures; the magnitude applies in the same direction as the other
/// severities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// 100% health impact.
    Catastrophic,
    /// 50% health impact.
    Critical,
    /// 20% health impact.
    High,
    /// 10% health impact.
    Medium,
    /// 5% health impact.
    Low,
    /// No health impact.
    None,
    /// Offsetting contribution worth 20%.
    Positive,
}

impl Severity {
    /// Signed weight in health units.
    pub fn weight(self) -> i64 {
        match self {
            Self::Catastrophic => 1000,
            Self::Critical => 500,
            Self::High => 200,
            Self::Medium => 100,
            Self::Low => 50,
            Self::None => 0,
            Self::Positive => -200,
        }
    }

    /// Magnitude applied to component health on rule transitions.
    pub fn magnitude(self) -> i64 {
        self.weight().abs()
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Catastrophic => write!(f, "catastrophic"),
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::None => write!(f, "none"),
            Self::Positive => write!(f, "positive"),
        }
    }
}

/// Rule operators combining one or more input results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOp {
    /// Fail iff any input failed (default).
    OnFail,
    /// Always pass.
    Disable,
    /// Fail iff value == n.
    EqualToN,
    /// Fail iff value != n.
    NotEqualToN,
    /// Fail iff value < n.
    LessThanN,
    /// Fail iff value > n.
    GreaterThanN,
    /// Fail after n cumulative input fails since creation.
    NEver,
    /// Fail after n consecutive input fails.
    NInRow,
    /// Fail if at least n of the last m inputs failed.
    NInM,
    /// Fail iff n <= value <= m.
    RangeNToM,
    /// Fail if at least n input fails occurred within the last m ms.
    NInTimeM,
    /// Fail once the input has been continuously failing for n ms.
    FailForTimeN,
    /// Pass iff any input passed.
    Or,
    /// Pass iff every input passed.
    And,
}

impl RuleOp {
    /// Whether the operator consumes the n operand.
    pub fn uses_n(self) -> bool {
        !matches!(self, Self::OnFail | Self::Disable | Self::Or | Self::And)
    }

    /// Whether the operator consumes the m operand.
    pub fn uses_m(self) -> bool {
        matches!(self, Self::NInM | Self::RangeNToM | Self::NInTimeM)
    }
}

impl fmt::Display for RuleOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OnFail => "on-fail",
            Self::Disable => "disable",
            Self::EqualToN => "equal-to-n",
            Self::NotEqualToN => "not-equal-to-n",
            Self::LessThanN => "less-than-n",
            Self::GreaterThanN => "greater-than-n",
            Self::NEver => "n-ever",
            Self::NInRow => "n-in-row",
            Self::NInM => "n-in-m",
            Self::RangeNToM => "range-n-to-m",
            Self::NInTimeM => "n-in-time-m",
            Self::FailForTimeN => "fail-for-time-n",
            Self::Or => "or",
            Self::And => "and",
        };
        write!(f, "{}", name)
    }
}

/// Per-object flag mask: location bits shared by every kind, plus
/// rule-only trigger/stat bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjFlags(pub u32);

impl ObjFlags {
    /// Run on the active processor.
    pub const LOCATION_ACTIVE: ObjFlags = ObjFlags(0x0001);
    /// Run on the standby processor (informational).
    pub const LOCATION_STANDBY: ObjFlags = ObjFlags(0x0002);
    /// Run on a line card (informational).
    pub const LOCATION_LINE_CARD: ObjFlags = ObjFlags(0x0004);
    /// All locations (default).
    pub const LOCATION_ALL: ObjFlags = ObjFlags(0x0007);
    /// Only trigger actions when the rule is the root cause (default).
    pub const TRIGGER_ROOT_CAUSE: ObjFlags = ObjFlags(0x0010);
    /// Trigger actions on every failure, bypassing root-cause gating.
    pub const TRIGGER_ALWAYS: ObjFlags = ObjFlags(0x0020);
    /// Exclude this rule from stats and health contributions.
    pub const NO_RESULT_STATS: ObjFlags = ObjFlags(0x0040);
    /// Internal object; results do not perturb health or notifications.
    pub const SILENT: ObjFlags = ObjFlags(0x0080);

    /// Empty mask.
    pub const fn empty() -> Self {
        ObjFlags(0)
    }

    /// True when every bit of `other` is set in `self`.
    pub fn contains(self, other: ObjFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: ObjFlags) {
        self.0 |= other.0;
    }

    /// Clear the bits of `other`.
    pub fn remove(&mut self, other: ObjFlags) {
        self.0 &= !other.0;
    }
}

impl BitOr for ObjFlags {
    type Output = ObjFlags;

    fn bitor(self, rhs: ObjFlags) -> ObjFlags {
        ObjFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for ObjFlags {
    fn bitor_assign(&mut self, rhs: ObjFlags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for ObjFlags {
    type Output = ObjFlags;

    fn bitand(self, rhs: ObjFlags) -> ObjFlags {
        ObjFlags(self.0 & rhs.0)
    }
}

/// Truncate a name to [`MAX_NAME_LEN`], reporting whether it shrank.
pub fn clip_name(name: &str) -> (String, bool) {
    if name.len() <= MAX_NAME_LEN {
        (name.to_string(), false)
    } else {
        let mut end = MAX_NAME_LEN;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        (name[..end].to_string(), true)
    }
}

/// Truncate a description to [`MAX_DESC_LEN`].
pub fn clip_description(desc: &str) -> String {
    if desc.len() <= MAX_DESC_LEN {
        desc.to_string()
    } else {
        let mut end = MAX_DESC_LEN;
        while !desc.is_char_boundary(end) {
            end -= 1;
        }
        desc[..end].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_weights() {
        assert_eq!(Severity::Catastrophic.weight(), 1000);
        assert_eq!(Severity::Critical.weight(), 500);
        assert_eq!(Severity::Positive.weight(), -200);
        assert_eq!(Severity::Positive.magnitude(), 200);
    }

    #[test]
    fn test_result_value_mapping() {
        assert_eq!(DiagResult::Pass.value(), 0);
        assert_eq!(DiagResult::Value(42).value(), 42);
        assert!(DiagResult::Value(1).kind_eq(DiagResult::Value(2)));
        assert!(!DiagResult::Pass.kind_eq(DiagResult::Fail));
    }

    #[test]
    fn test_flag_mask_operations() {
        let mut flags = ObjFlags::LOCATION_ALL | ObjFlags::TRIGGER_ROOT_CAUSE;
        assert!(flags.contains(ObjFlags::LOCATION_ACTIVE));
        flags.remove(ObjFlags::TRIGGER_ROOT_CAUSE);
        flags.insert(ObjFlags::TRIGGER_ALWAYS);
        assert!(!flags.contains(ObjFlags::TRIGGER_ROOT_CAUSE));
        assert!(flags.contains(ObjFlags::TRIGGER_ALWAYS));
    }

    #[test]
    fn test_name_truncation() {
        let (short, clipped) = clip_name("eth0");
        assert_eq!(short, "eth0");
        assert!(!clipped);

        let long = "a".repeat(40);
        let (cut, clipped) = clip_name(&long);
        assert_eq!(cut.len(), MAX_NAME_LEN);
        assert!(clipped);
    }

    #[test]
    fn test_operator_operand_usage() {
        assert!(RuleOp::NInM.uses_n());
        assert!(RuleOp::NInM.uses_m());
        assert!(RuleOp::LessThanN.uses_n());
        assert!(!RuleOp::LessThanN.uses_m());
        assert!(!RuleOp::And.uses_n());
    }
}
