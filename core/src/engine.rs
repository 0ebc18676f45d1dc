// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The engine handle: owns the object database, the worker pool, the
//! scheduler thread and the host hooks. Everything is lifecycle-scoped
//! to this handle; there are no module-level singletons.

use crate::builtin;
use crate::db::Db;
use crate::dispatch::{CpuMeter, Dispatcher, DEFAULT_GUARD_BUDGET, DEFAULT_WORKERS};
use crate::error::EngineResult;
use crate::notify::{
    ActionResultEvent, ComponentHealthEvent, HookEvent, NotifyHooks, RuleResultEvent,
    TestResultEvent, UserAlertEvent,
};
use crate::probe::{action_fn, probe_fn};
use crate::sched;
use crate::types::{
    DiagResult, ObjFlags, ObjKind, Severity, PERIOD_FAST_MS, PERIOD_SLOW_MS,
};
use crossbeam::channel::{self, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// Engine tuning knobs. The defaults match the documented behavior;
/// hosts normally only touch the worker count.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker pool size.
    pub workers: usize,
    /// CPU warn threshold in tenths of a percent.
    pub cpu_warn: i64,
    /// CPU high threshold in tenths of a percent.
    pub cpu_high: i64,
    /// Guard budget for a single probe or action callout.
    pub guard_budget: Duration,
    /// Register the internal CPU and scheduler self-diagnostics.
    pub internal_diagnostics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            cpu_warn: crate::dispatch::CPU_WARN_DEFAULT,
            cpu_high: crate::dispatch::CPU_HIGH_DEFAULT,
            guard_budget: DEFAULT_GUARD_BUDGET,
            internal_diagnostics: true,
        }
    }
}

/// State shared between the public handle, the scheduler thread and the
/// worker pool.
pub(crate) struct Shared {
    /// The object database, graph, queues and health counters, behind
    /// the single DB lock.
    pub db: Mutex<Db>,
    /// Worker pool.
    pub dispatcher: Arc<Dispatcher>,
    /// Host notification callbacks.
    pub hooks: RwLock<NotifyHooks>,
    /// CPU meter feeding the throttle and the internal usage test.
    pub cpu: Arc<CpuMeter>,
    /// Alert recipient from the configuration protocol.
    pub alert_recipient: Mutex<Option<String>>,
    wake_tx: Sender<()>,
    quit: AtomicBool,
}

impl Shared {
    /// True once shutdown has begun.
    pub fn is_shut_down(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    /// Release the scheduler thread to re-examine its queues.
    pub fn wake_scheduler(&self) {
        let _ = self.wake_tx.send(());
    }

    /// Deliver deferred events to the host. Never called with the DB
    /// lock held.
    pub fn fire_events(&self, events: Vec<HookEvent>) {
        if events.is_empty() {
            return;
        }
        let hooks = self.hooks.read();
        for event in &events {
            hooks.fire(event);
        }
    }
}

/// The embeddable diagnostics engine.
///
/// Create one per process, register tests, rules, actions and
/// components through the `test_*`, `rule_*`, `action_*`, `comp_*` and
/// `depend_*` verbs, then let the scheduler drive the probes. The
/// handle is cheap to clone and safe to use from any thread.
pub struct Engine {
    pub(crate) shared: Arc<Shared>,
    sched_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Engine with default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Engine with explicit configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        let cpu = Arc::new(CpuMeter::new(config.cpu_warn, config.cpu_high));
        let dispatcher = Dispatcher::new(config.workers, cpu.clone(), config.guard_budget);
        let (wake_tx, wake_rx) = channel::unbounded();

        let shared = Arc::new(Shared {
            db: Mutex::new(Db::new()),
            dispatcher,
            hooks: RwLock::new(NotifyHooks::default()),
            cpu,
            alert_recipient: Mutex::new(None),
            wake_tx,
            quit: AtomicBool::new(false),
        });

        let sched_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("vigil-sched".to_string())
            .spawn(move || sched::run(sched_shared, wake_rx))
            .expect("failed to spawn scheduler thread");

        let engine = Self {
            shared,
            sched_handle: Mutex::new(Some(handle)),
        };
        engine.bootstrap(&config);
        info!(workers = config.workers, "diagnostics engine started");
        engine
    }

    /// Stop the scheduler and the worker pool. Idempotent; also runs on
    /// drop. Worker threads blocked inside a host callout exit when the
    /// callout returns.
    pub fn shutdown(&self) {
        if self.shared.quit.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("engine shutting down");
        self.shared.wake_scheduler();
        self.shared.dispatcher.kill_all();
        if let Some(handle) = self.sched_handle.lock().take() {
            let _ = handle.join();
        }
        info!("diagnostics engine stopped");
    }

    /// Register the test-result callback.
    pub fn on_test_result<F>(&self, hook: F)
    where
        F: Fn(&TestResultEvent) + Send + Sync + 'static,
    {
        self.shared.hooks.write().on_test_result = Some(Box::new(hook));
    }

    /// Register the rule-result callback.
    pub fn on_rule_result<F>(&self, hook: F)
    where
        F: Fn(&RuleResultEvent) + Send + Sync + 'static,
    {
        self.shared.hooks.write().on_rule_result = Some(Box::new(hook));
    }

    /// Register the action-result callback.
    pub fn on_action_result<F>(&self, hook: F)
    where
        F: Fn(&ActionResultEvent) + Send + Sync + 'static,
    {
        self.shared.hooks.write().on_action_result = Some(Box::new(hook));
    }

    /// Register the component-health callback.
    pub fn on_component_health<F>(&self, hook: F)
    where
        F: Fn(&ComponentHealthEvent) + Send + Sync + 'static,
    {
        self.shared.hooks.write().on_component_health = Some(Box::new(hook));
    }

    /// Register the user-alert callback.
    pub fn on_user_alert<F>(&self, hook: F)
    where
        F: Fn(&UserAlertEvent) + Send + Sync + 'static,
    {
        self.shared.hooks.write().on_user_alert = Some(Box::new(hook));
    }

    /// Register the platform hook backing the built-in recovery
    /// actions (reload, switchover and friends).
    pub fn on_platform_action<F>(&self, hook: F)
    where
        F: Fn(&str, Option<&str>) -> DiagResult + Send + Sync + 'static,
    {
        self.shared.hooks.write().on_platform_action = Some(Box::new(hook));
    }

    /// Set the recipient carried on user-alert notifications.
    pub fn set_alert_recipient(&self, recipient: Option<String>) {
        *self.shared.alert_recipient.lock() = recipient;
    }

    /// Reserved components, built-in actions and, unless disabled, the
    /// internal self-diagnostics.
    fn bootstrap(&self, config: &EngineConfig) {
        let _ = self.comp_create(builtin::COMP_SYSTEM);
        let _ = self.comp_create(builtin::COMP_STANDBY);

        for name in builtin::BUILTIN_ACTIONS {
            let _ = self.action_create_builtin(name);
        }

        if config.internal_diagnostics {
            if let Err(err) = self.register_self_diagnostics() {
                tracing::error!(%err, "failed to register internal diagnostics");
            }
        }
    }

    /// The engine watching itself: CPU throttle rules and the scheduler
    /// self-check, all inside the System component and flagged silent.
    fn register_self_diagnostics(&self) -> EngineResult<()> {
        let meter = self.shared.cpu.clone();
        self.test_create_polled(
            builtin::TEST_CPU_USAGE,
            probe_fn(move |_, _| DiagResult::Value(meter.cpu_tenths())),
            None,
            PERIOD_FAST_MS,
        )?;

        let meter = self.shared.cpu.clone();
        self.action_create(
            builtin::ACTION_THROTTLE_WARN,
            action_fn(move |_, _| {
                meter.recalculate();
                DiagResult::Pass
            }),
            None,
        )?;
        let meter = self.shared.cpu.clone();
        self.action_create(
            builtin::ACTION_THROTTLE_HIGH,
            action_fn(move |_, _| {
                meter.recalculate();
                DiagResult::Pass
            }),
            None,
        )?;

        self.rule_create(
            builtin::RULE_CPU_WARN,
            builtin::TEST_CPU_USAGE,
            builtin::ACTION_THROTTLE_WARN,
        )?;
        self.rule_set_type(
            builtin::RULE_CPU_WARN,
            crate::types::RuleOp::GreaterThanN,
            self.shared.cpu.warn_threshold(),
            0,
        )?;
        self.rule_set_severity(builtin::RULE_CPU_WARN, Severity::Low)?;

        self.rule_create(
            builtin::RULE_CPU_HIGH,
            builtin::TEST_CPU_USAGE,
            builtin::ACTION_THROTTLE_HIGH,
        )?;
        self.rule_set_type(
            builtin::RULE_CPU_HIGH,
            crate::types::RuleOp::GreaterThanN,
            self.shared.cpu.high_threshold(),
            0,
        )?;
        self.rule_set_severity(builtin::RULE_CPU_HIGH, Severity::Medium)?;

        // Only the high rule is the root cause when both trip.
        let _ = self.depend_create(builtin::RULE_CPU_WARN, builtin::RULE_CPU_HIGH);

        // Scheduler self-check: taking and releasing the DB lock proves
        // the lock and the queues are serviceable; recovery requeues
        // every enabled polled test.
        let weak = Arc::downgrade(&self.shared);
        self.test_create_polled(
            builtin::TEST_SCHED_CHECK,
            probe_fn(move |_, _| match weak.upgrade() {
                Some(shared) => {
                    let db = shared.db.lock();
                    let _ = db.queues.len();
                    DiagResult::Pass
                }
                None => DiagResult::Abort,
            }),
            None,
            PERIOD_SLOW_MS,
        )?;

        let weak = Arc::downgrade(&self.shared);
        self.action_create(
            builtin::ACTION_SCHED_RECOVER,
            action_fn(move |_, _| match weak.upgrade() {
                Some(shared) => {
                    let wake = {
                        let mut db = shared.db.lock();
                        sched::requeue_all(&mut db)
                    };
                    if wake {
                        shared.wake_scheduler();
                    }
                    DiagResult::Pass
                }
                None => DiagResult::Abort,
            }),
            None,
        )?;
        self.rule_create(
            builtin::RULE_SCHED_CHECK,
            builtin::TEST_SCHED_CHECK,
            builtin::ACTION_SCHED_RECOVER,
        )?;

        // Internal objects stay out of health and host notifications.
        {
            let mut db = self.shared.db.lock();
            for name in [
                builtin::TEST_CPU_USAGE,
                builtin::TEST_SCHED_CHECK,
            ] {
                if let Some(id) = db.get(ObjKind::Test, name) {
                    if let Some(obj) = db.obj_mut(id) {
                        obj.flags.insert(ObjFlags::SILENT);
                    }
                }
            }
            for name in [builtin::RULE_CPU_WARN, builtin::RULE_CPU_HIGH, builtin::RULE_SCHED_CHECK]
            {
                if let Some(id) = db.get(ObjKind::Rule, name) {
                    if let Some(obj) = db.obj_mut(id) {
                        obj.flags.insert(ObjFlags::SILENT);
                    }
                }
            }
            for name in [builtin::ACTION_THROTTLE_WARN, builtin::ACTION_THROTTLE_HIGH] {
                if let Some(id) = db.get(ObjKind::Action, name) {
                    if let Some(obj) = db.obj_mut(id) {
                        obj.flags.insert(ObjFlags::SILENT);
                    }
                }
            }
        }

        self.comp_contains_many(
            builtin::COMP_SYSTEM,
            &[
                builtin::TEST_CPU_USAGE,
                builtin::RULE_CPU_WARN,
                builtin::RULE_CPU_HIGH,
                builtin::ACTION_THROTTLE_WARN,
                builtin::ACTION_THROTTLE_HIGH,
                builtin::TEST_SCHED_CHECK,
                builtin::RULE_SCHED_CHECK,
                builtin::ACTION_SCHED_RECOVER,
            ],
        )?;

        self.test_chain_ready(builtin::TEST_CPU_USAGE)?;
        self.test_chain_ready(builtin::TEST_SCHED_CHECK)?;
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
