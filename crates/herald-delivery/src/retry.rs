//! Retry budget and terminal-failure policy.
//!
//! Every failure state of the connection machine is handed to a
//! `RetryController`. While the budget lasts it asks for a fixed-interval
//! wait, after which the transport is closed and delivery restarts from
//! name resolution. Once the budget is spent the configured
//! `RetryPolicyAction` decides between terminating the client, suspending
//! it, or dropping only the event that kept failing.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 5;

/// Default wait between retries.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(0);

/// What happens once the retry budget is spent.
///
/// Parsed leniently from the Redfish `DeliveryRetryPolicy` strings: any
/// value other than `TerminateAfterRetries` or `SuspendRetries` means
/// `RetryForever`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RetryPolicyAction {
    /// Discard the queue and stop the client permanently.
    #[default]
    TerminateAfterRetries,
    /// Discard the queue and rest until resumed.
    SuspendRetries,
    /// Drop the failing event, reset the budget and keep going.
    RetryForever,
}

impl RetryPolicyAction {
    /// Canonical policy name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TerminateAfterRetries => "TerminateAfterRetries",
            Self::SuspendRetries => "SuspendRetries",
            Self::RetryForever => "RetryForever",
        }
    }
}

impl From<&str> for RetryPolicyAction {
    fn from(action: &str) -> Self {
        match action {
            "TerminateAfterRetries" => Self::TerminateAfterRetries,
            "SuspendRetries" => Self::SuspendRetries,
            _ => Self::RetryForever,
        }
    }
}

impl From<String> for RetryPolicyAction {
    fn from(action: String) -> Self {
        Self::from(action.as_str())
    }
}

impl From<RetryPolicyAction> for String {
    fn from(action: RetryPolicyAction) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for RetryPolicyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry configuration of a single client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the initial attempt before `action` applies.
    pub max_attempts: u32,

    /// Fixed wait before each retry.
    pub interval: Duration,

    /// Terminal behavior once the budget is spent.
    pub action: RetryPolicyAction,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            interval: DEFAULT_RETRY_INTERVAL,
            action: RetryPolicyAction::default(),
        }
    }
}

/// Outcome of consulting the controller from a failure state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Start a retry timer; when it fires, close and start over.
    Wait {
        /// How long to wait
        delay: Duration,
        /// Retry number (1-based)
        attempt: u32,
    },
    /// A retry timer is already running.
    AlreadyWaiting,
    /// Budget spent: discard everything and terminate.
    Terminate,
    /// Budget spent: discard everything and suspend.
    Suspend,
    /// Budget spent: discard only the head event and continue.
    DropEvent,
}

/// Retry counter plus the single-flight guard for the retry timer.
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    policy: RetryPolicy,
    retry_count: u32,
    timer_running: bool,
}

impl RetryController {
    /// Creates a controller with a fresh budget.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, retry_count: 0, timer_running: false }
    }

    /// Decides what a failure state leads to.
    ///
    /// `DropEvent` resets the counter; `Wait` consumes one retry and arms
    /// the timer guard until [`RetryController::timer_fired`]. While the
    /// guard is armed nothing else is decided, so the retry that spent the
    /// last of the budget always runs before the policy action applies.
    pub fn decide(&mut self) -> RetryDecision {
        if self.timer_running {
            return RetryDecision::AlreadyWaiting;
        }

        if self.retry_count >= self.policy.max_attempts {
            return match self.policy.action {
                RetryPolicyAction::TerminateAfterRetries => RetryDecision::Terminate,
                RetryPolicyAction::SuspendRetries => RetryDecision::Suspend,
                RetryPolicyAction::RetryForever => {
                    self.retry_count = 0;
                    RetryDecision::DropEvent
                },
            };
        }

        self.retry_count += 1;
        self.timer_running = true;
        RetryDecision::Wait { delay: self.policy.interval, attempt: self.retry_count }
    }

    /// Releases the timer guard.
    pub fn timer_fired(&mut self) {
        self.timer_running = false;
    }

    /// Restores the full budget after a successful delivery.
    pub fn reset(&mut self) {
        self.retry_count = 0;
    }

    /// Updates the budget and interval.
    pub fn configure(&mut self, max_attempts: u32, interval: Duration) {
        self.policy.max_attempts = max_attempts;
        self.policy.interval = interval;
    }

    /// Updates the terminal action.
    pub fn set_action(&mut self, action: RetryPolicyAction) {
        self.policy.action = action;
    }

    /// Retries consumed since the last success or reset.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Whether a retry timer is outstanding.
    pub fn is_waiting(&self) -> bool {
        self.timer_running
    }

    /// Current policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(max_attempts: u32, action: RetryPolicyAction) -> RetryController {
        RetryController::new(RetryPolicy { max_attempts, interval: Duration::from_secs(3), action })
    }

    #[test]
    fn waits_until_budget_is_spent_then_terminates() {
        let mut retry = controller(2, RetryPolicyAction::TerminateAfterRetries);

        assert_eq!(retry.decide(), RetryDecision::Wait { delay: Duration::from_secs(3), attempt: 1 });
        retry.timer_fired();
        assert_eq!(retry.decide(), RetryDecision::Wait { delay: Duration::from_secs(3), attempt: 2 });
        retry.timer_fired();
        assert_eq!(retry.decide(), RetryDecision::Terminate);
        assert_eq!(retry.retry_count(), 2);
    }

    #[test]
    fn single_flight_guard_blocks_second_timer() {
        let mut retry = controller(5, RetryPolicyAction::SuspendRetries);

        assert!(matches!(retry.decide(), RetryDecision::Wait { .. }));
        assert_eq!(retry.decide(), RetryDecision::AlreadyWaiting);
        assert_eq!(retry.retry_count(), 1);
        assert!(retry.is_waiting());
    }

    #[test]
    fn armed_timer_defers_policy_action() {
        let mut retry = controller(1, RetryPolicyAction::TerminateAfterRetries);

        assert!(matches!(retry.decide(), RetryDecision::Wait { attempt: 1, .. }));
        assert_eq!(retry.decide(), RetryDecision::AlreadyWaiting);
        retry.timer_fired();
        assert_eq!(retry.decide(), RetryDecision::Terminate);
    }

    #[test]
    fn retry_forever_drops_event_and_resets_counter() {
        let mut retry = controller(1, RetryPolicyAction::RetryForever);

        assert!(matches!(retry.decide(), RetryDecision::Wait { .. }));
        retry.timer_fired();
        assert_eq!(retry.decide(), RetryDecision::DropEvent);
        assert_eq!(retry.retry_count(), 0);
    }

    #[test]
    fn zero_budget_applies_action_immediately() {
        let mut retry = controller(0, RetryPolicyAction::SuspendRetries);
        assert_eq!(retry.decide(), RetryDecision::Suspend);
    }

    #[test]
    fn unknown_action_strings_mean_retry_forever() {
        assert_eq!(RetryPolicyAction::from("TerminateAfterRetries"), RetryPolicyAction::TerminateAfterRetries);
        assert_eq!(RetryPolicyAction::from("SuspendRetries"), RetryPolicyAction::SuspendRetries);
        assert_eq!(RetryPolicyAction::from("RetryForever"), RetryPolicyAction::RetryForever);
        assert_eq!(RetryPolicyAction::from("suspendretries"), RetryPolicyAction::RetryForever);
        assert_eq!(RetryPolicyAction::from(""), RetryPolicyAction::RetryForever);
    }

    #[test]
    fn default_policy_matches_redfish_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.interval, Duration::ZERO);
        assert_eq!(policy.action, RetryPolicyAction::TerminateAfterRetries);
    }
}
