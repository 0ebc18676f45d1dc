// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Action registration and completion.

use crate::db::ActionHandler;
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::probe::{ActionFn, ProbeContext};
use crate::seq;
use crate::types::{DiagResult, ObjFlags, ObjKind};

impl Engine {
    /// Register a recovery action with a host handler.
    pub fn action_create(
        &self,
        name: &str,
        handler: ActionFn,
        context: Option<ProbeContext>,
    ) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let id = db.get_or_create(ObjKind::Action, name)?;
        if let Some(obj) = db.obj_mut(id) {
            if let Some(data) = obj.as_action_mut() {
                data.handler = Some(ActionHandler::Host(handler));
            }
            obj.base.context = context;
        }
        Ok(())
    }

    /// Register an alerting action: each trigger raises a user-visible
    /// alert carrying the given text.
    pub fn action_create_user_alert(&self, name: &str, text: &str) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let id = db.get_or_create(ObjKind::Action, name)?;
        if let Some(data) = db.obj_mut(id).and_then(|o| o.as_action_mut()) {
            data.handler = Some(ActionHandler::UserAlert(text.to_string()));
        }
        Ok(())
    }

    /// Register one of the reserved built-in platform actions; the
    /// handler resolves through the host's platform hook.
    pub(crate) fn action_create_builtin(&self, name: &'static str) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let id = db.get_or_create(ObjKind::Action, name)?;
        if let Some(obj) = db.obj_mut(id) {
            if let Some(data) = obj.as_action_mut() {
                data.handler = Some(ActionHandler::Builtin(name));
            }
            obj.base.state = crate::types::ObjState::Enabled;
        }
        Ok(())
    }

    /// Complete an action whose handler earlier returned InProgress.
    pub fn action_complete(
        &self,
        name: &str,
        instance: Option<&str>,
        result: DiagResult,
    ) -> EngineResult<()> {
        let id = {
            let db = self.shared.db.lock();
            db.expect(ObjKind::Action, name)?
        };
        seq::action_complete(&self.shared, id, instance.map(str::to_string), result);
        Ok(())
    }

    /// Enable an action (one instance, or all).
    pub fn action_enable(&self, name: &str, instance: Option<&str>) -> EngineResult<()> {
        self.enable_impl(ObjKind::Action, name, instance)
    }

    /// Disable an action (one instance, or all).
    pub fn action_disable(&self, name: &str, instance: Option<&str>) -> EngineResult<()> {
        self.disable_impl(ObjKind::Action, name, instance)
    }

    /// Delete an action and its edges.
    pub fn action_delete(&self, name: &str) -> EngineResult<()> {
        self.delete_impl(ObjKind::Action, name)
    }

    /// Set an action's description.
    pub fn action_set_description(&self, name: &str, description: &str) -> EngineResult<()> {
        self.set_description_impl(ObjKind::Action, name, description)
    }

    /// Replace an action's flags.
    pub fn action_set_flags(&self, name: &str, flags: ObjFlags) -> EngineResult<()> {
        self.set_flags_impl(ObjKind::Action, name, flags)
    }

    /// Read an action's flags.
    pub fn action_get_flags(&self, name: &str) -> EngineResult<ObjFlags> {
        self.get_flags_impl(ObjKind::Action, name)
    }
}
