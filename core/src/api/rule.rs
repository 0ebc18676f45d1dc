// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Rule registration and configuration.

use crate::builtin;
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::types::{ObjFlags, ObjKind, RuleOp, Severity};

impl Engine {
    /// Create a rule over an input (test or rule) firing an action on
    /// failure. Both references may be forward references; the default
    /// operator is OnFail and the default gating is root-cause.
    pub fn rule_create(&self, name: &str, input: &str, action: &str) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let id = db.get_or_create(ObjKind::Rule, name)?;
        if let Some(obj) = db.obj_mut(id) {
            obj.flags = ObjFlags::LOCATION_ALL | ObjFlags::TRIGGER_ROOT_CAUSE;
        }

        let input_id = db.ensure_ref(input)?;
        db.check_ref_kind(input_id, &[ObjKind::Test, ObjKind::Rule])?;
        db.add_rule_input(id, input_id);

        let action_id = db.ensure_ref(action)?;
        db.check_ref_kind(action_id, &[ObjKind::Action])?;
        db.add_rule_action(id, action_id);
        Ok(())
    }

    /// Set a rule's operator and operand pair.
    pub fn rule_set_type(&self, name: &str, op: RuleOp, n: i64, m: i64) -> EngineResult<()> {
        {
            let mut db = self.shared.db.lock();
            let id = db.expect(ObjKind::Rule, name)?;
            if let Some(data) = db.obj_mut(id).and_then(|o| o.as_rule_mut()) {
                data.op = op;
                data.n = n;
                data.m = m;
            }
        }

        // The internal throttle rules double as the live threshold
        // configuration for the CPU meter.
        if name == builtin::RULE_CPU_WARN {
            let high = self.shared.cpu.high_threshold();
            self.shared.cpu.set_thresholds(n, high);
        } else if name == builtin::RULE_CPU_HIGH {
            let warn = self.shared.cpu.warn_threshold();
            self.shared.cpu.set_thresholds(warn, n);
        }
        Ok(())
    }

    /// Append an input to a rule's ordered input list.
    pub fn rule_add_input(&self, name: &str, input: &str) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let id = db.expect(ObjKind::Rule, name)?;
        let input_id = db.ensure_ref(input)?;
        db.check_ref_kind(input_id, &[ObjKind::Test, ObjKind::Rule])?;
        db.add_rule_input(id, input_id);
        Ok(())
    }

    /// Append an action to a rule's trigger list.
    pub fn rule_add_action(&self, name: &str, action: &str) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let id = db.expect(ObjKind::Rule, name)?;
        let action_id = db.ensure_ref(action)?;
        db.check_ref_kind(action_id, &[ObjKind::Action])?;
        db.add_rule_action(id, action_id);
        Ok(())
    }

    /// Set the health impact of a rule.
    pub fn rule_set_severity(&self, name: &str, severity: Severity) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let id = db.expect(ObjKind::Rule, name)?;
        if let Some(data) = db.obj_mut(id).and_then(|o| o.as_rule_mut()) {
            data.severity = severity;
        }
        Ok(())
    }

    /// Enable a rule (one instance, or all).
    pub fn rule_enable(&self, name: &str, instance: Option<&str>) -> EngineResult<()> {
        self.enable_impl(ObjKind::Rule, name, instance)
    }

    /// Disable a rule (one instance, or all).
    pub fn rule_disable(&self, name: &str, instance: Option<&str>) -> EngineResult<()> {
        self.disable_impl(ObjKind::Rule, name, instance)
    }

    /// Delete a rule and its edges.
    pub fn rule_delete(&self, name: &str) -> EngineResult<()> {
        self.delete_impl(ObjKind::Rule, name)
    }

    /// Set a rule's description.
    pub fn rule_set_description(&self, name: &str, description: &str) -> EngineResult<()> {
        self.set_description_impl(ObjKind::Rule, name, description)
    }

    /// Replace a rule's flags.
    pub fn rule_set_flags(&self, name: &str, flags: ObjFlags) -> EngineResult<()> {
        self.set_flags_impl(ObjKind::Rule, name, flags)
    }

    /// Read a rule's flags.
    pub fn rule_get_flags(&self, name: &str) -> EngineResult<ObjFlags> {
        self.get_flags_impl(ObjKind::Rule, name)
    }
}
