//! Execution-lifetime watchdog: the pause/resume protocol that lets a
//! sandboxed plugin perform a bounded long synchronous job without being
//! terminated by the host's deadline timer.
//!
//! The watchdog never runs the countdown itself. It emits advisory
//! `TimerPauseRequest` notifications; the host owns the actual clock and may
//! still kill the sandbox mid-pause.

use crate::dispatch::DispatchError;
use crate::notify::{Notification, Notifier};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

/// Bounds on a requested pause window, in seconds. The floor keeps the
/// mechanism from degenerating into a no-op; the ceiling keeps a plugin from
/// suspending its termination deadline indefinitely.
pub const MIN_TIME_WAIT: u64 = 10;
pub const MAX_TIME_WAIT: u64 = 3600;

/// Notification method consumed by the host's termination timer.
pub const TIMER_PAUSE_REQUEST_METHOD: &str = "TimerPauseRequest";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerAction {
    Pause,
    Restart,
}

/// Validated params for the long-running-job capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LongRunningJobConfig {
    #[serde(rename = "timeWait")]
    pub time_wait: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchdogPhase {
    Running,
    Paused,
}

/// Per-execution-context pause/resume state machine. Owned exclusively by one
/// context and destroyed with it; never shared across contexts.
pub struct Watchdog {
    phase: WatchdogPhase,
    pause_window_secs: Option<u64>,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self {
            phase: WatchdogPhase::Running,
            pause_window_secs: None,
        }
    }
}

/// Restores `Running` and emits the restart notification when dropped, so the
/// host deadline is resumed even when the job itself fails or panics.
struct ResumeGuard<'a> {
    watchdog: &'a mut Watchdog,
    notifier: &'a dyn Notifier,
}

impl Drop for ResumeGuard<'_> {
    fn drop(&mut self) {
        self.watchdog.phase = WatchdogPhase::Running;
        self.watchdog.pause_window_secs = None;
        self.notifier.notify(Notification {
            method: TIMER_PAUSE_REQUEST_METHOD.to_string(),
            params: json!({ "timerAction": TimerAction::Restart }),
        });
    }
}

impl Watchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> WatchdogPhase {
        self.phase
    }

    /// The requested pause window; populated only while `Paused`.
    pub fn pause_window_secs(&self) -> Option<u64> {
        self.pause_window_secs
    }

    /// Run one long synchronous job under a paused termination deadline.
    ///
    /// A nested pause is rejected, then a window outside
    /// `MIN_TIME_WAIT..=MAX_TIME_WAIT`. A rejected request changes nothing,
    /// emits nothing, and never runs the job. On acceptance one pause
    /// notification precedes the job and one restart notification follows it.
    pub fn run_long_job<T, F>(
        &mut self,
        config: LongRunningJobConfig,
        notifier: &dyn Notifier,
        work: F,
    ) -> Result<T, DispatchError>
    where
        F: FnOnce() -> T,
    {
        if self.phase == WatchdogPhase::Paused {
            warn!("pause request rejected: a pause is already active");
            return Err(DispatchError::PauseProtocolViolation {
                message: "Long running job pause is already active for this execution context."
                    .to_string(),
            });
        }

        let time_wait = config.time_wait;
        if !(MIN_TIME_WAIT..=MAX_TIME_WAIT).contains(&time_wait) {
            warn!(time_wait, "pause request rejected: window out of range");
            return Err(DispatchError::PauseProtocolViolation {
                message: format!(
                    "Long running job time can be only between {MIN_TIME_WAIT} and \
                     {MAX_TIME_WAIT} seconds. Received: {time_wait} seconds."
                ),
            });
        }

        self.phase = WatchdogPhase::Paused;
        self.pause_window_secs = Some(time_wait);
        debug!(time_wait, "pausing termination deadline for long job");
        notifier.notify(Notification {
            method: TIMER_PAUSE_REQUEST_METHOD.to_string(),
            params: json!({
                "timerAction": TimerAction::Pause,
                "timeWait": time_wait,
            }),
        });

        let guard = ResumeGuard {
            watchdog: self,
            notifier,
        };
        let outcome = work();
        drop(guard);

        Ok(outcome)
    }
}
