// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Component registration, containment and health access.

use crate::api::{instance_keys, set_state};
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::notify::{ComponentHealthEvent, HookEvent};
use crate::sched;
use crate::types::{ObjKind, ObjState, HEALTH_MAX};

impl Engine {
    /// Create a component.
    pub fn comp_create(&self, name: &str) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let id = db.get_or_create(ObjKind::Component, name)?;
        if let Some(obj) = db.obj_mut(id) {
            obj.base.state = ObjState::Enabled;
        }
        Ok(())
    }

    /// Add an object (of any kind, components included) to a component.
    pub fn comp_contains(&self, parent: &str, child: &str) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let parent_id = db.expect(ObjKind::Component, parent)?;
        let child_id = db.ensure_ref(child)?;
        db.add_member(parent_id, child_id);
        Ok(())
    }

    /// Add several objects to a component in one call.
    pub fn comp_contains_many(&self, parent: &str, children: &[&str]) -> EngineResult<()> {
        for child in children {
            self.comp_contains(parent, child)?;
        }
        Ok(())
    }

    /// Enable a component and everything it contains, recursively.
    /// Contained polled tests rejoin the scheduler.
    pub fn comp_enable(&self, name: &str) -> EngineResult<()> {
        let wake = {
            let mut db = self.shared.db.lock();
            let id = db.expect(ObjKind::Component, name)?;
            let mut wake = false;
            for member in membership_closure(&db, id) {
                set_state(&mut db, member, None, ObjState::Enabled);
                wake |= crate::api::schedule_if_test(&mut db, member, None);
            }
            wake
        };
        if wake {
            self.shared.wake_scheduler();
        }
        Ok(())
    }

    /// Disable a component and everything it contains, recursively.
    pub fn comp_disable(&self, name: &str) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let id = db.expect(ObjKind::Component, name)?;
        for member in membership_closure(&db, id) {
            set_state(&mut db, member, None, ObjState::Disabled);
            for key in instance_keys(&db, member, None) {
                sched::remove_test(&mut db, member, &key);
            }
        }
        Ok(())
    }

    /// Delete a component. Members survive; only the containment edges
    /// go away.
    pub fn comp_delete(&self, name: &str) -> EngineResult<()> {
        self.delete_impl(ObjKind::Component, name)
    }

    /// Set a component's description.
    pub fn comp_set_description(&self, name: &str, description: &str) -> EngineResult<()> {
        self.set_description_impl(ObjKind::Component, name, description)
    }

    /// Read a component's current health, in [0, 1000].
    pub fn comp_health_get(&self, name: &str) -> EngineResult<i64> {
        let db = self.shared.db.lock();
        let id = db.expect(ObjKind::Component, name)?;
        Ok(db
            .obj(id)
            .and_then(|o| o.as_comp())
            .map(|c| c.health)
            .unwrap_or(HEALTH_MAX))
    }

    /// Set a component's health directly, clamped to [0, 1000].
    pub fn comp_health_set(&self, name: &str, health: i64) -> EngineResult<()> {
        let event = {
            let mut db = self.shared.db.lock();
            let id = db.expect(ObjKind::Component, name)?;
            let Some(obj) = db.obj_mut(id) else {
                return Ok(());
            };
            let comp_name = obj.name.clone();
            match obj.as_comp_mut() {
                Some(data) => {
                    data.health = health.clamp(0, HEALTH_MAX);
                    Some(HookEvent::Health(ComponentHealthEvent {
                        component: comp_name,
                        health: data.health,
                        confidence: data.confidence,
                    }))
                }
                None => None,
            }
        };
        if let Some(event) = event {
            self.shared.fire_events(vec![event]);
        }
        Ok(())
    }

    /// Read a component's confidence, in [0, 1000].
    pub fn comp_confidence_get(&self, name: &str) -> EngineResult<i64> {
        let db = self.shared.db.lock();
        let id = db.expect(ObjKind::Component, name)?;
        Ok(db
            .obj(id)
            .and_then(|o| o.as_comp())
            .map(|c| c.confidence)
            .unwrap_or(HEALTH_MAX))
    }
}

/// Members of a component, expanded through nested components. The
/// component itself is included.
fn membership_closure(db: &crate::db::Db, root: crate::db::ObjId) -> Vec<crate::db::ObjId> {
    let mut seen = vec![root];
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let members = match db.obj(id).and_then(|o| o.as_comp()) {
            Some(data) => data.members.clone(),
            None => continue,
        };
        for member in members {
            if !seen.contains(&member) {
                seen.push(member);
                stack.push(member);
            }
        }
    }
    seen
}
