// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Dependency edges driving root-cause identification.

use crate::engine::Engine;
use crate::error::EngineResult;
use crate::rci;
use crate::types::ObjKind;

impl Engine {
    /// Create a dependency: the parent rule or component is only the
    /// root cause when no rule under the child is also failing. Edges
    /// that would introduce a cycle are discarded with a log.
    pub fn depend_create(&self, parent: &str, child: &str) -> EngineResult<()> {
        let mut db = self.shared.db.lock();
        let parent_id = db.ensure_ref(parent)?;
        db.check_ref_kind(parent_id, &[ObjKind::Rule, ObjKind::Component])?;
        let child_id = db.ensure_ref(child)?;
        db.check_ref_kind(child_id, &[ObjKind::Rule, ObjKind::Component])?;
        rci::depend_create(&mut db, parent_id, child_id)
    }

    /// Delete a dependency. Accepted for compatibility; logged as
    /// unsupported and otherwise ignored.
    pub fn depend_delete(&self, parent: &str, child: &str) -> EngineResult<()> {
        let db = self.shared.db.lock();
        if let (Some(parent_id), Some(child_id)) =
            (db.find_named(parent), db.find_named(child))
        {
            rci::depend_delete(&db, parent_id, child_id);
        }
        Ok(())
    }
}
