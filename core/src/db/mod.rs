// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The object database: per-kind name registries over a single arena,
//! graph edges as handle pairs, and the scheduler queues.
//!
//! The whole structure lives behind one `parking_lot::Mutex` owned by
//! the engine; every accessor here takes `&mut self` and assumes the
//! caller holds that lock. Probe and action callouts never happen with
//! the lock held, so hosts may re-enter the public API from callbacks.

pub mod instance;
pub mod object;

use crate::error::{EngineError, EngineResult};
use crate::sched::SchedQueues;
use crate::types::{clip_name, ObjKind, ObjState};
use std::collections::HashMap;
use tracing::{debug, error};

pub use instance::{HistorySlot, Instance, InstanceKey, RuleWindow, SchedSlot, Stats};
pub use object::{
    ActionData, ActionHandler, CompData, ObjId, Object, ObjVariant, RuleData, SeverityTally,
    TestData, TestKind,
};

/// Lookup order used when resolving a bare name reference.
const ANY_LOOKUP_ORDER: [ObjKind; 5] = [
    ObjKind::Test,
    ObjKind::Rule,
    ObjKind::Action,
    ObjKind::Component,
    ObjKind::Any,
];

/// The object database. Names are case-sensitive and unique within a
/// kind; forward references live in the registry under [`ObjKind::Any`]
/// until upgraded.
pub struct Db {
    arena: Vec<Option<Object>>,
    index: HashMap<(ObjKind, String), ObjId>,
    /// Scheduler queues; guarded by the same lock as the objects.
    pub queues: SchedQueues,
    /// Enqueues are rejected while blocked unless forced.
    pub blocked: bool,
    loop_seq: u64,
}

impl Db {
    /// Empty database.
    pub fn new() -> Self {
        Self {
            arena: Vec::new(),
            index: HashMap::new(),
            queues: SchedQueues::new(),
            blocked: false,
            loop_seq: 0,
        }
    }

    /// Borrow an object.
    pub fn obj(&self, id: ObjId) -> Option<&Object> {
        self.arena.get(id).and_then(|slot| slot.as_ref())
    }

    /// Mutably borrow an object.
    pub fn obj_mut(&mut self, id: ObjId) -> Option<&mut Object> {
        self.arena.get_mut(id).and_then(|slot| slot.as_mut())
    }

    /// Name of an object, for logging.
    pub fn name_of(&self, id: ObjId) -> &str {
        self.obj(id).map(|o| o.name.as_str()).unwrap_or("<deleted>")
    }

    /// Strongly-typed lookup; None when the name is absent under this
    /// kind.
    pub fn get(&self, kind: ObjKind, name: &str) -> Option<ObjId> {
        self.index.get(&(kind, name.to_string())).copied()
    }

    /// Resolve a bare name across kinds, concrete kinds first.
    pub fn find_named(&self, name: &str) -> Option<ObjId> {
        ANY_LOOKUP_ORDER
            .iter()
            .find_map(|kind| self.get(*kind, name))
    }

    /// Get-or-create with a concrete kind. Returns the existing object,
    /// upgrades a forward-reference stub in place, or allocates a new
    /// record in state Created. Truncated names that collide with an
    /// existing object are rejected.
    pub fn get_or_create(&mut self, kind: ObjKind, name: &str) -> EngineResult<ObjId> {
        if name.is_empty() {
            return Err(EngineError::Invalid("empty object name".to_string()));
        }
        let (clipped, truncated) = clip_name(name);
        if let Some(id) = self.get(kind, &clipped) {
            if truncated {
                error!(name, existing = %clipped, "truncated name collides, rejected");
                return Err(EngineError::NameCollision(clipped));
            }
            return Ok(id);
        }

        if let Some(stub_id) = self.get(ObjKind::Any, &clipped) {
            // Upgrade the stub in place; edges wired against it survive.
            debug!(name = %clipped, %kind, "upgrading forward reference");
            self.index.remove(&(ObjKind::Any, clipped.clone()));
            self.index.insert((kind, clipped), stub_id);
            let obj = self
                .obj_mut(stub_id)
                .expect("stub handle present in index");
            obj.variant = default_variant(kind);
            obj.base.state = ObjState::Created;
            return Ok(stub_id);
        }

        let id = self.alloc(clipped.clone());
        let obj = self.obj_mut(id).expect("freshly allocated");
        obj.variant = default_variant(kind);
        obj.base.state = ObjState::Created;
        self.index.insert((kind, clipped), id);
        Ok(id)
    }

    /// Resolve a reference target, creating an Allocated stub when the
    /// name is unknown (forward reference policy).
    pub fn ensure_ref(&mut self, name: &str) -> EngineResult<ObjId> {
        if name.is_empty() {
            return Err(EngineError::Invalid("empty reference name".to_string()));
        }
        let (clipped, _) = clip_name(name);
        if let Some(id) = self.find_named(&clipped) {
            return Ok(id);
        }
        debug!(name = %clipped, "creating forward-reference stub");
        let id = self.alloc(clipped.clone());
        self.index.insert((ObjKind::Any, clipped), id);
        Ok(id)
    }

    /// Typed fetch that errors (logged) instead of returning None, for
    /// API verbs that require an existing object of a given kind.
    pub fn expect(&self, kind: ObjKind, name: &str) -> EngineResult<ObjId> {
        if let Some(id) = self.get(kind, name) {
            return Ok(id);
        }
        if let Some(id) = self.find_named(name) {
            let actual = self.obj(id).map(|o| o.kind()).unwrap_or(ObjKind::Any);
            error!(name, expected = %kind, %actual, "kind mismatch");
            return Err(EngineError::KindMismatch {
                name: name.to_string(),
                expected: kind,
                actual,
            });
        }
        Err(EngineError::NotFound {
            kind,
            name: name.to_string(),
        })
    }

    /// Check that a resolved reference is of an accepted kind (stubs
    /// always pass). Logged and refused otherwise.
    pub fn check_ref_kind(&self, id: ObjId, accepted: &[ObjKind]) -> EngineResult<()> {
        let obj = match self.obj(id) {
            Some(o) => o,
            None => return Ok(()),
        };
        let kind = obj.kind();
        if kind == ObjKind::Any || accepted.contains(&kind) {
            Ok(())
        } else {
            error!(name = %obj.name, %kind, "reference to object of wrong kind refused");
            Err(EngineError::KindMismatch {
                name: obj.name.clone(),
                expected: accepted[0],
                actual: kind,
            })
        }
    }

    /// All live handles of a kind, in allocation order.
    pub fn iter_kind(&self, kind: ObjKind) -> Vec<ObjId> {
        self.arena
            .iter()
            .flatten()
            .filter(|o| o.kind() == kind)
            .map(|o| o.id)
            .collect()
    }

    /// Count of live objects.
    pub fn len(&self) -> usize {
        self.arena.iter().flatten().count()
    }

    /// True when no live objects remain.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add a containment edge component -> child. Both sides are kept
    /// in sync; duplicates are no-ops.
    pub fn add_member(&mut self, comp: ObjId, child: ObjId) {
        if let Some(data) = self.obj_mut(comp).and_then(|o| o.as_comp_mut()) {
            if !data.members.contains(&child) {
                data.members.push(child);
            }
        }
        if let Some(obj) = self.obj_mut(child) {
            if !obj.member_of.contains(&comp) {
                obj.member_of.push(comp);
            }
        }
    }

    /// Remove a containment edge.
    pub fn remove_member(&mut self, comp: ObjId, child: ObjId) {
        if let Some(data) = self.obj_mut(comp).and_then(|o| o.as_comp_mut()) {
            data.members.retain(|&m| m != child);
        }
        if let Some(obj) = self.obj_mut(child) {
            obj.member_of.retain(|&m| m != comp);
        }
    }

    /// Wire an input edge rule <- input, with the inverse consumer edge.
    pub fn add_rule_input(&mut self, rule: ObjId, input: ObjId) {
        if let Some(data) = self.obj_mut(rule).and_then(|o| o.as_rule_mut()) {
            if !data.inputs.contains(&input) {
                data.inputs.push(input);
            }
        }
        if let Some(obj) = self.obj_mut(input) {
            if !obj.consumers.contains(&rule) {
                obj.consumers.push(rule);
            }
        }
    }

    /// Attach an action to a rule's trigger list.
    pub fn add_rule_action(&mut self, rule: ObjId, action: ObjId) {
        if let Some(data) = self.obj_mut(rule).and_then(|o| o.as_rule_mut()) {
            if !data.actions.contains(&action) {
                data.actions.push(action);
            }
        }
    }

    /// Next loop-domain sequence number.
    pub fn next_loop_domain(&mut self) -> u64 {
        self.loop_seq += 1;
        self.loop_seq
    }

    /// Delete an object: removes its registry entry, all edges touching
    /// it, its instances and any scheduler queue entries.
    pub fn delete(&mut self, id: ObjId) {
        let (kind, name) = match self.obj(id) {
            Some(o) => (o.kind(), o.name.clone()),
            None => return,
        };
        debug!(name = %name, %kind, "deleting object");

        self.queues.remove_object(id);

        // Edges are name-lookup relations, never ownership, so a full
        // sweep of the arena is sufficient and keeps both sides exact.
        for slot in self.arena.iter_mut().flatten() {
            slot.member_of.retain(|&m| m != id);
            slot.consumers.retain(|&c| c != id);
            slot.depend_children.retain(|&d| d != id);
            slot.depend_parents.retain(|&d| d != id);
            match &mut slot.variant {
                ObjVariant::Rule(rule) => {
                    rule.inputs.retain(|&i| i != id);
                    rule.actions.retain(|&a| a != id);
                }
                ObjVariant::Component(comp) => {
                    comp.members.retain(|&m| m != id);
                }
                _ => {}
            }
        }

        self.index.remove(&(kind, name));
        if let Some(slot) = self.arena.get_mut(id) {
            if let Some(obj) = slot.as_mut() {
                obj.base.state = ObjState::Deleted;
            }
            *slot = None;
        }
    }

    fn alloc(&mut self, name: String) -> ObjId {
        let id = self.arena.len();
        self.arena.push(Some(Object::stub(id, name)));
        id
    }
}

impl Default for Db {
    fn default() -> Self {
        Self::new()
    }
}

fn default_variant(kind: ObjKind) -> ObjVariant {
    match kind {
        ObjKind::Any => ObjVariant::Stub,
        ObjKind::Test => ObjVariant::Test(TestData {
            kind: TestKind::Notification { autopass_ms: None },
        }),
        ObjKind::Rule => ObjVariant::Rule(RuleData::default()),
        ObjKind::Action => ObjVariant::Action(ActionData::default()),
        ObjKind::Component => ObjVariant::Component(CompData::default()),
    }
}
