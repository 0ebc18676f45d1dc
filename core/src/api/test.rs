// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Test registration, notification and the chain-ready walk.

use crate::api::schedule_if_test;
use crate::db::{ObjId, ObjVariant, TestData, TestKind};
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::probe::{ProbeContext, ProbeFn};
use crate::seq;
use crate::types::{DiagResult, ObjFlags, ObjKind};
use std::collections::HashSet;
use tracing::debug;

impl Engine {
    /// Register a polled test: the probe runs on a worker thread every
    /// `period_ms` milliseconds.
    pub fn test_create_polled(
        &self,
        name: &str,
        probe: ProbeFn,
        context: Option<ProbeContext>,
        period_ms: u64,
    ) -> EngineResult<()> {
        if period_ms == 0 {
            return Err(EngineError::Invalid(format!(
                "polled test '{}' needs a non-zero period",
                name
            )));
        }
        let mut db = self.shared.db.lock();
        let id = db.get_or_create(ObjKind::Test, name)?;
        if let Some(obj) = db.obj_mut(id) {
            obj.variant = ObjVariant::Test(TestData {
                kind: TestKind::Polled {
                    period_ms,
                    probe: Some(probe),
                },
            });
            obj.base.context = context;
        }
        Ok(())
    }

    /// Register a notification test: results arrive through
    /// [`Engine::notify`].
    pub fn test_create_notification(&self, name: &str) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let id = db.get_or_create(ObjKind::Test, name)?;
        if let Some(obj) = db.obj_mut(id) {
            if !matches!(
                obj.variant,
                ObjVariant::Test(TestData {
                    kind: TestKind::Notification { .. }
                })
            ) {
                obj.variant = ObjVariant::Test(TestData {
                    kind: TestKind::Notification { autopass_ms: None },
                });
            }
        }
        Ok(())
    }

    /// Register a component-health observer test: each poll yields the
    /// named component's current health as a Value result.
    pub fn test_create_comp_health(&self, name: &str, comp: &str) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let comp_id = db.ensure_ref(comp)?;
        db.check_ref_kind(comp_id, &[ObjKind::Component])?;
        let id = db.get_or_create(ObjKind::Test, name)?;
        if let Some(obj) = db.obj_mut(id) {
            obj.variant = ObjVariant::Test(TestData {
                kind: TestKind::CompHealth { comp: comp_id },
            });
        }
        Ok(())
    }

    /// Set (or clear) the autopass delay of a notification test: after
    /// a Fail with no further notifications inside the delay, the test
    /// passes by itself. A delay of zero passes on the next scheduler
    /// tick.
    pub fn test_set_autopass(&self, name: &str, delay_ms: Option<u64>) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let id = db.expect(ObjKind::Test, name)?;
        match db.obj_mut(id).and_then(|o| o.as_test_mut()) {
            Some(TestData {
                kind: TestKind::Notification { autopass_ms },
            }) => {
                *autopass_ms = delay_ms;
                Ok(())
            }
            _ => Err(EngineError::Invalid(format!(
                "'{}' is not a notification test",
                name
            ))),
        }
    }

    /// Report a result for a test instance. This is both how
    /// notification tests produce results and how hosts complete an
    /// earlier InProgress run.
    pub fn notify(
        &self,
        name: &str,
        instance: Option<&str>,
        result: DiagResult,
    ) -> EngineResult<()> {
        let id = {
            let db = self.shared.db.lock();
            db.expect(ObjKind::Test, name)?
        };
        seq::from_test_notify(
            &self.shared,
            id,
            instance.map(str::to_string),
            result,
        );
        Ok(())
    }

    /// Walk the rule graph rooted at this test and bring the test and
    /// every transitively connected rule and action to its default
    /// state. A no-op until the test actually exists; idempotent.
    pub fn test_chain_ready(&self, name: &str) -> EngineResult<()> {
        let wake = {
            let mut db = self.shared.db.lock();
            let Some(start) = db.get(ObjKind::Test, name) else {
                debug!(test = name, "chain-ready before creation, ignored");
                return Ok(());
            };

            let mut visited: HashSet<ObjId> = HashSet::new();
            let mut stack = vec![start];
            let mut tests = Vec::new();
            while let Some(id) = stack.pop() {
                if !visited.insert(id) {
                    continue;
                }
                let Some(obj) = db.obj_mut(id) else { continue };
                match obj.kind() {
                    ObjKind::Any => continue,
                    kind => {
                        let target = obj.default_state;
                        for inst in obj.all_instances_mut() {
                            inst.state = target;
                        }
                        if kind == ObjKind::Test {
                            tests.push(id);
                        }
                    }
                }
                let obj = db.obj(id).expect("visited above");
                stack.extend(obj.consumers.iter().copied());
                if let Some(rule) = obj.as_rule() {
                    stack.extend(rule.actions.iter().copied());
                }
            }

            let mut wake = false;
            for test in tests {
                wake |= schedule_if_test(&mut db, test, None);
            }
            wake
        };
        if wake {
            self.shared.wake_scheduler();
        }
        Ok(())
    }

    /// Enable a test (one instance, or all).
    pub fn test_enable(&self, name: &str, instance: Option<&str>) -> EngineResult<()> {
        self.enable_impl(ObjKind::Test, name, instance)
    }

    /// Disable a test (one instance, or all).
    pub fn test_disable(&self, name: &str, instance: Option<&str>) -> EngineResult<()> {
        self.disable_impl(ObjKind::Test, name, instance)
    }

    /// Delete a test, its edges and its instances.
    pub fn test_delete(&self, name: &str) -> EngineResult<()> {
        self.delete_impl(ObjKind::Test, name)
    }

    /// Set a test's description.
    pub fn test_set_description(&self, name: &str, description: &str) -> EngineResult<()> {
        self.set_description_impl(ObjKind::Test, name, description)
    }

    /// Replace a test's flags.
    pub fn test_set_flags(&self, name: &str, flags: ObjFlags) -> EngineResult<()> {
        self.set_flags_impl(ObjKind::Test, name, flags)
    }

    /// Read a test's flags.
    pub fn test_get_flags(&self, name: &str) -> EngineResult<ObjFlags> {
        self.get_flags_impl(ObjKind::Test, name)
    }
}
