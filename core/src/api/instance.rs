// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Named sub-instances of tests, rules and actions.

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::probe::ProbeContext;
use crate::sched;
use crate::types::clip_name;

impl Engine {
    /// Create a named instance on an object. The instance replicates
    /// the template's current state and owns the given context; an
    /// enabled polled test instance joins the scheduler at once.
    pub fn instance_create(
        &self,
        object: &str,
        instance: &str,
        context: Option<ProbeContext>,
    ) -> EngineResult<()> {
        if instance.is_empty() {
            return Err(EngineError::Invalid("empty instance name".to_string()));
        }
        let (instance, _) = clip_name(instance);
        let wake = {
            let mut db = self.shared.db.lock();
            let id = db.ensure_ref(object)?;
            if let Some(obj) = db.obj_mut(id) {
                obj.add_instance(instance.clone(), context);
            }
            sched::add_test(&mut db, id, &Some(instance), false)
        };
        if wake {
            self.shared.wake_scheduler();
        }
        Ok(())
    }

    /// Delete a named instance, removing it from the scheduler first.
    pub fn instance_delete(&self, object: &str, instance: &str) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let Some(id) = db.find_named(object) else {
            return Err(EngineError::Invalid(format!(
                "unknown object '{}'",
                object
            )));
        };
        let key = Some(instance.to_string());
        sched::remove_test(&mut db, id, &key);
        if let Some(obj) = db.obj_mut(id) {
            obj.remove_instance(instance);
        }
        Ok(())
    }

    /// Names of an object's sub-instances.
    pub fn instance_list(&self, object: &str) -> Vec<String> {
        let db = self.shared.db.lock();
        db.find_named(object)
            .and_then(|id| db.obj(id))
            .map(|obj| {
                obj.instances
                    .iter()
                    .filter_map(|i| i.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}
