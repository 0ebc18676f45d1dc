// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Serializable status snapshots.
//!
//! External surfaces (status endpoints, CLIs, notifiers) are built on
//! these read-only views instead of touching engine internals.

use crate::db::SeverityTally;
use crate::db::Stats;
use crate::engine::Engine;
use crate::sched::TestQueue;
use crate::types::{DiagResult, ObjFlags, ObjKind, ObjState};
use serde::{Deserialize, Serialize};

/// Point-in-time view of one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSnapshot {
    /// Instance name; None for the base instance.
    pub name: Option<String>,
    /// Lifecycle state.
    pub state: ObjState,
    /// Most recent result.
    pub last_result: Option<DiagResult>,
    /// Value carried by the most recent result.
    pub last_value: i64,
    /// Scheduler queue currently holding this instance.
    pub queued: Option<TestQueue>,
    /// Dependency child that suppressed the last trigger, if any.
    pub suppressed_by: Option<String>,
    /// Run counters and result history.
    pub stats: Stats,
}

/// Point-in-time view of one object and its instances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    /// Object name.
    pub name: String,
    /// Object kind.
    pub kind: ObjKind,
    /// Informational description.
    pub description: String,
    /// Flag mask.
    pub flags: ObjFlags,
    /// State applied by chain-ready.
    pub default_state: ObjState,
    /// Names of the components containing this object.
    pub member_of: Vec<String>,
    /// Base instance first, then named instances.
    pub instances: Vec<InstanceSnapshot>,
}

/// Point-in-time view of one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentSnapshot {
    /// Component name.
    pub name: String,
    /// Lifecycle state.
    pub state: ObjState,
    /// Health in [0, 1000]; divide by 10 for percent.
    pub health: i64,
    /// Confidence in [0, 1000].
    pub confidence: i64,
    /// Standing failures per severity bucket.
    pub tally: SeverityTally,
    /// Names of contained objects.
    pub members: Vec<String>,
}

impl Engine {
    /// Snapshot an object by kind and name.
    pub fn object_snapshot(&self, kind: ObjKind, name: &str) -> Option<ObjectSnapshot> {
        let db = self.shared.db.lock();
        let id = db.get(kind, name)?;
        let obj = db.obj(id)?;
        Some(ObjectSnapshot {
            name: obj.name.clone(),
            kind: obj.kind(),
            description: obj.description.clone(),
            flags: obj.flags,
            default_state: obj.default_state,
            member_of: obj
                .member_of
                .iter()
                .filter_map(|&c| db.obj(c).map(|o| o.name.clone()))
                .collect(),
            instances: obj
                .all_instances()
                .map(|i| InstanceSnapshot {
                    name: i.name.clone(),
                    state: i.state,
                    last_result: i.last_result,
                    last_value: i.last_value,
                    queued: i.sched.queued,
                    suppressed_by: i.suppressed_by.clone(),
                    stats: i.stats.clone(),
                })
                .collect(),
        })
    }

    /// Snapshot a component by name.
    pub fn component_snapshot(&self, name: &str) -> Option<ComponentSnapshot> {
        let db = self.shared.db.lock();
        let id = db.get(ObjKind::Component, name)?;
        let obj = db.obj(id)?;
        let data = obj.as_comp()?;
        Some(ComponentSnapshot {
            name: obj.name.clone(),
            state: obj.state(),
            health: data.health,
            confidence: data.confidence,
            tally: data.tally,
            members: data
                .members
                .iter()
                .filter_map(|&m| db.obj(m).map(|o| o.name.clone()))
                .collect(),
        })
    }

    /// Names of every live object of a kind.
    pub fn list_objects(&self, kind: ObjKind) -> Vec<String> {
        let db = self.shared.db.lock();
        db.iter_kind(kind)
            .into_iter()
            .filter_map(|id| db.obj(id).map(|o| o.name.clone()))
            .collect()
    }

    /// Every scheduler queue entry as (test name, instance). Intended
    /// for diagnostics and invariant checks, not steady-state use.
    #[doc(hidden)]
    pub fn sched_entries(&self) -> Vec<(String, Option<String>)> {
        let db = self.shared.db.lock();
        db.queues
            .entries()
            .into_iter()
            .map(|(obj, inst)| (db.name_of(obj).to_string(), inst))
            .collect()
    }
}
