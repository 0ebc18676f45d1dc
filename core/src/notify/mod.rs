// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Host notification hooks.
//!
//! Every runtime outcome is surfaced to the host through these
//! callbacks: test results, rule results, action results, component
//! health changes and user alerts. Events are collected while the DB
//! lock is held and fired after it is released, so hooks may re-enter
//! the public API.

use crate::types::{DiagResult, Severity};
use serde::{Deserialize, Serialize};

/// A test instance produced a result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResultEvent {
    /// Test name.
    pub test: String,
    /// Instance name, None for the base instance.
    pub instance: Option<String>,
    /// The result.
    pub result: DiagResult,
}

/// A rule instance was evaluated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleResultEvent {
    /// Rule name.
    pub rule: String,
    /// Instance name, None for the base instance.
    pub instance: Option<String>,
    /// Evaluation outcome.
    pub result: DiagResult,
    /// Rule severity at evaluation time.
    pub severity: Severity,
    /// True when a failing rule was identified as the root cause and
    /// recovery is in progress.
    pub root_cause: bool,
    /// Set when action dispatch was suppressed by a failing dependency
    /// child.
    pub suppressed_by: Option<String>,
}

/// An action handler completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResultEvent {
    /// Action name.
    pub action: String,
    /// Instance name, None for the base instance.
    pub instance: Option<String>,
    /// Rule that triggered the action, when known.
    pub rule: Option<String>,
    /// Handler outcome.
    pub result: DiagResult,
}

/// A component's health or confidence changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealthEvent {
    /// Component name.
    pub component: String,
    /// Health in [0, 1000].
    pub health: i64,
    /// Confidence in [0, 1000].
    pub confidence: i64,
}

/// A user-alert action fired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAlertEvent {
    /// Action name.
    pub action: String,
    /// Alert text registered with the action.
    pub text: String,
    /// Alert recipient from the configuration protocol, if any.
    pub recipient: Option<String>,
}

/// A deferred notification, queued under the DB lock and fired after it
/// is released.
#[derive(Debug, Clone)]
pub enum HookEvent {
    /// Test result.
    Test(TestResultEvent),
    /// Rule result.
    Rule(RuleResultEvent),
    /// Action result.
    Action(ActionResultEvent),
    /// Component health change.
    Health(ComponentHealthEvent),
    /// User alert.
    Alert(UserAlertEvent),
}

type Hook<E> = Box<dyn Fn(&E) + Send + Sync>;

/// Platform hook invoked for the reserved built-in actions. Receives
/// the built-in action name and the instance.
pub type PlatformHook =
    Box<dyn Fn(&str, Option<&str>) -> DiagResult + Send + Sync>;

/// The host's registered notification callbacks.
#[derive(Default)]
pub struct NotifyHooks {
    /// Test result callback.
    pub on_test_result: Option<Hook<TestResultEvent>>,
    /// Rule result callback.
    pub on_rule_result: Option<Hook<RuleResultEvent>>,
    /// Action result callback.
    pub on_action_result: Option<Hook<ActionResultEvent>>,
    /// Component health callback.
    pub on_component_health: Option<Hook<ComponentHealthEvent>>,
    /// User alert callback.
    pub on_user_alert: Option<Hook<UserAlertEvent>>,
    /// Built-in platform action hook (reload, switchover and friends).
    pub on_platform_action: Option<PlatformHook>,
}

impl NotifyHooks {
    /// Deliver one event to its registered callback, if any.
    pub fn fire(&self, event: &HookEvent) {
        match event {
            HookEvent::Test(e) => {
                if let Some(hook) = &self.on_test_result {
                    hook(e);
                }
            }
            HookEvent::Rule(e) => {
                if let Some(hook) = &self.on_rule_result {
                    hook(e);
                }
            }
            HookEvent::Action(e) => {
                if let Some(hook) = &self.on_action_result {
                    hook(e);
                }
            }
            HookEvent::Health(e) => {
                if let Some(hook) = &self.on_component_health {
                    hook(e);
                }
            }
            HookEvent::Alert(e) => {
                if let Some(hook) = &self.on_user_alert {
                    hook(e);
                }
            }
        }
    }
}

impl std::fmt::Debug for NotifyHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyHooks")
            .field("on_test_result", &self.on_test_result.is_some())
            .field("on_rule_result", &self.on_rule_result.is_some())
            .field("on_action_result", &self.on_action_result.is_some())
            .field("on_component_health", &self.on_component_health.is_some())
            .field("on_user_alert", &self.on_user_alert.is_some())
            .field("on_platform_action", &self.on_platform_action.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fire_routes_to_registered_hook() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let hooks = NotifyHooks {
            on_test_result: Some(Box::new(move |e| {
                assert_eq!(e.test, "fan");
                seen.fetch_add(1, Ordering::SeqCst);
            })),
            ..Default::default()
        };

        hooks.fire(&HookEvent::Test(TestResultEvent {
            test: "fan".to_string(),
            instance: None,
            result: DiagResult::Pass,
        }));
        // No rule hook registered: must be silently dropped.
        hooks.fire(&HookEvent::Rule(RuleResultEvent {
            rule: "r".to_string(),
            instance: None,
            result: DiagResult::Fail,
            severity: Severity::None,
            root_cause: false,
            suppressed_by: None,
        }));

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
