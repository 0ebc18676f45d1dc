// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The embedding API, grouped by kind: `test_*`, `rule_*`, `action_*`,
//! `comp_*`, `depend_*` and `instance_*` verbs on [`Engine`].
//!
//! Objects are created on first reference and may be configured in any
//! order; forward references materialise as stubs that are upgraded in
//! place. Rejections are logged where they happen and also returned so
//! hosts can observe them.

pub mod action;
pub mod comp;
pub mod depend;
pub mod instance;
pub mod rule;
pub mod test;

use crate::db::{InstanceKey, ObjId, TestKind};
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::sched;
use crate::types::{clip_description, ObjFlags, ObjKind, ObjState};
use tracing::debug;

impl Engine {
    /// Set an object's description, truncated to the documented limit.
    pub(crate) fn set_description_impl(
        &self,
        kind: ObjKind,
        name: &str,
        description: &str,
    ) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let id = db.expect(kind, name)?;
        if let Some(obj) = db.obj_mut(id) {
            obj.description = clip_description(description);
        }
        Ok(())
    }

    /// Replace an object's flag mask.
    pub(crate) fn set_flags_impl(
        &self,
        kind: ObjKind,
        name: &str,
        flags: ObjFlags,
    ) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let id = db.expect(kind, name)?;
        if let Some(obj) = db.obj_mut(id) {
            obj.flags = flags;
        }
        Ok(())
    }

    /// Read an object's flag mask.
    pub(crate) fn get_flags_impl(&self, kind: ObjKind, name: &str) -> EngineResult<ObjFlags> {
        let db = self.shared.db.lock();
        let id = db.expect(kind, name)?;
        Ok(db.obj(id).map(|o| o.flags).unwrap_or_default())
    }

    /// Enable an object (one instance, or all of them). Enabled polled
    /// tests are handed to the scheduler.
    pub(crate) fn enable_impl(
        &self,
        kind: ObjKind,
        name: &str,
        instance: Option<&str>,
    ) -> EngineResult<()> {
        let wake = {
            let mut db = self.shared.db.lock();
            let id = db.expect(kind, name)?;
            set_state(&mut db, id, instance, ObjState::Enabled);
            schedule_if_test(&mut db, id, instance)
        };
        if wake {
            self.shared.wake_scheduler();
        }
        Ok(())
    }

    /// Disable an object (one instance, or all of them). Disabled tests
    /// leave the scheduler queues.
    pub(crate) fn disable_impl(
        &self,
        kind: ObjKind,
        name: &str,
        instance: Option<&str>,
    ) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let id = db.expect(kind, name)?;
        set_state(&mut db, id, instance, ObjState::Disabled);

        let keys = instance_keys(&db, id, instance);
        for key in keys {
            sched::remove_test(&mut db, id, &key);
        }
        Ok(())
    }

    /// Delete an object along with its edges and instances.
    pub(crate) fn delete_impl(&self, kind: ObjKind, name: &str) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let id = db.expect(kind, name)?;
        db.delete(id);
        Ok(())
    }
}

/// Apply a state to one instance or to every instance of an object.
pub(crate) fn set_state(
    db: &mut crate::db::Db,
    id: ObjId,
    instance: Option<&str>,
    state: ObjState,
) {
    let Some(obj) = db.obj_mut(id) else { return };
    match instance {
        Some(name) => {
            if obj.has_instance(name) {
                obj.instance_mut(&Some(name.to_string())).state = state;
            } else {
                debug!(object = %obj.name, instance = name, "no such instance");
            }
        }
        None => {
            for inst in obj.all_instances_mut() {
                inst.state = state;
            }
        }
    }
}

/// Keys addressed by an instance filter: one key, or every instance.
pub(crate) fn instance_keys(
    db: &crate::db::Db,
    id: ObjId,
    instance: Option<&str>,
) -> Vec<InstanceKey> {
    match instance {
        Some(name) => vec![Some(name.to_string())],
        None => db
            .obj(id)
            .map(|o| o.all_instances().map(|i| i.name.clone()).collect())
            .unwrap_or_default(),
    }
}

/// Queue enabled polled instances of a test; true when the scheduler
/// needs a wake.
pub(crate) fn schedule_if_test(
    db: &mut crate::db::Db,
    id: ObjId,
    instance: Option<&str>,
) -> bool {
    let polled = matches!(
        db.obj(id).and_then(|o| o.as_test()).map(|t| &t.kind),
        Some(TestKind::Polled { .. }) | Some(TestKind::CompHealth { .. })
    );
    if !polled {
        return false;
    }
    let mut wake = false;
    for key in instance_keys(db, id, instance) {
        wake |= sched::add_test(db, id, &key, false);
    }
    wake
}
