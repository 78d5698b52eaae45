//! Per-sandbox execution context: the only handle sandboxed code holds on the
//! host. It exposes call operations and nothing else; registry, permission
//! store, and watchdog state stay module-private behind it.

use crate::capability::{schema_for, CapabilitySpec, Subject};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::notify::Notifier;
use crate::watchdog::{LongRunningJobConfig, Watchdog, WatchdogPhase};
use serde_json::Value;
use std::sync::Arc;

/// Dispatch name of the watchdog's pause capability.
pub const LONG_RUNNING_JOB_METHOD: &str = "capsule_longRunningJob";

fn non_callable_message(received: &str) -> String {
    format!("Long running job work must be a callable, but '{received}' was received instead.")
}

/// Registry entry for the long-running-job capability. The bound hook only
/// fires when a caller reaches it without a work payload, which is itself
/// the protocol violation, so it fails with the non-callable rejection.
pub fn long_running_job_spec() -> CapabilitySpec {
    CapabilitySpec::new(
        LONG_RUNNING_JOB_METHOD,
        schema_for::<LongRunningJobConfig>(),
        Box::new(|_subject, _params| {
            Err(DispatchError::PauseProtocolViolation {
                message: non_callable_message("null"),
            })
        }),
    )
}

/// One isolated execution context per plugin instance. Operations within a
/// context are sequential; contexts share nothing mutable, so no locking.
pub struct ExecutionContext {
    subject: Subject,
    dispatcher: Arc<Dispatcher>,
    watchdog: Watchdog,
    notifier: Arc<dyn Notifier>,
}

impl ExecutionContext {
    pub fn new(subject: Subject, dispatcher: Arc<Dispatcher>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            subject,
            dispatcher,
            watchdog: Watchdog::new(),
            notifier,
        }
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn watchdog_phase(&self) -> WatchdogPhase {
        self.watchdog.phase()
    }

    /// Invoke an ordinary capability through the dispatch pipeline.
    ///
    /// The pause capability cannot be invoked this way: a plain invocation
    /// carries no work payload and is rejected before any validation or
    /// notification.
    pub fn invoke(&self, method: &str, params: &Value) -> Result<Value, DispatchError> {
        if method == LONG_RUNNING_JOB_METHOD {
            return Err(DispatchError::PauseProtocolViolation {
                message: non_callable_message("null"),
            });
        }
        self.dispatcher.dispatch(&self.subject, method, params)
    }

    /// Invoke the long-running-job capability with a unit of synchronous
    /// work. The request passes the same lookup/validate/authorize stages as
    /// any other capability before the watchdog protocol runs.
    pub fn long_running_job<T, F>(&mut self, params: &Value, work: F) -> Result<T, DispatchError>
    where
        F: FnOnce() -> T,
    {
        let (_spec, validated) =
            self.dispatcher
                .authorize_call(&self.subject, LONG_RUNNING_JOB_METHOD, params)?;
        let config: LongRunningJobConfig = serde_json::from_value(validated)
            .map_err(|err| DispatchError::InvalidParams {
                message: err.to_string(),
            })?;
        self.watchdog
            .run_long_job(config, self.notifier.as_ref(), work)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilityRegistry;
    use crate::dispatch::{ErrorKind, GrantTable};
    use crate::interface_state::{
        get_interface_state_spec, ComponentState, InterfaceStateHooks, GET_INTERFACE_STATE_METHOD,
    };
    use crate::notify::RecordingNotifier;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct EmptyState;

    impl InterfaceStateHooks for EmptyState {
        fn get_interface_state(
            &self,
            _subject: &Subject,
            _id: &str,
        ) -> Result<ComponentState, String> {
            Ok(ComponentState::new())
        }
    }

    fn context_for(subject: &str, granted: &[&str]) -> (ExecutionContext, Arc<RecordingNotifier>) {
        let registry = Arc::new(
            CapabilityRegistry::build(vec![
                get_interface_state_spec(Arc::new(EmptyState)),
                long_running_job_spec(),
            ])
            .expect("build registry"),
        );
        let mut grants = GrantTable::new();
        for method in granted {
            grants.grant(subject, method);
        }
        grants.restrict_from(&registry);
        let dispatcher = Arc::new(Dispatcher::new(registry, Arc::new(grants)));
        let notifier = Arc::new(RecordingNotifier::new());
        (
            ExecutionContext::new(Subject::from(subject), dispatcher, notifier.clone()),
            notifier,
        )
    }

    #[test]
    fn long_running_job_happy_path_flips_flag_and_notifies_twice() {
        let (mut context, notifier) = context_for("plugin.demo", &[LONG_RUNNING_JOB_METHOD]);
        let flag = AtomicBool::new(false);

        context
            .long_running_job(&json!({"timeWait": 30}), || {
                flag.store(true, Ordering::SeqCst)
            })
            .expect("job accepted");

        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(context.watchdog_phase(), WatchdogPhase::Running);

        let events = notifier.recorded();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].params,
            json!({"timerAction": "pause", "timeWait": 30})
        );
        assert_eq!(events[1].params, json!({"timerAction": "restart"}));
    }

    #[test]
    fn long_running_job_requires_the_permission() {
        let (mut context, notifier) = context_for("plugin.demo", &[]);

        let err = context
            .long_running_job(&json!({"timeWait": 30}), || ())
            .expect_err("no grant");

        assert_eq!(err, DispatchError::Unauthorized);
        assert!(notifier.recorded().is_empty());
    }

    #[test]
    fn long_running_job_params_are_schema_checked_before_the_watchdog() {
        let (mut context, notifier) = context_for("plugin.demo", &[LONG_RUNNING_JOB_METHOD]);

        let err = context
            .long_running_job(&json!({"timeWait": "soon"}), || ())
            .expect_err("mistyped timeWait");

        assert_eq!(err.kind(), ErrorKind::InvalidParams);
        assert!(notifier.recorded().is_empty());
    }

    #[test]
    fn plain_invoke_of_the_pause_capability_is_the_non_callable_rejection() {
        let (context, notifier) = context_for("plugin.demo", &[LONG_RUNNING_JOB_METHOD]);

        // Rejected even though the params are invalid too: the callable check
        // comes first.
        let err = context
            .invoke(LONG_RUNNING_JOB_METHOD, &json!({"timeWait": 9}))
            .expect_err("no work payload");

        assert_eq!(err.kind(), ErrorKind::PauseProtocolViolation);
        assert_eq!(
            err.to_string(),
            "Long running job work must be a callable, but 'null' was received instead."
        );
        assert!(notifier.recorded().is_empty());
    }

    #[test]
    fn direct_dispatch_without_work_is_still_a_pause_protocol_violation() {
        let (context, notifier) = context_for("plugin.demo", &[LONG_RUNNING_JOB_METHOD]);

        // A host driving the dispatcher itself, bypassing the context, must
        // see the same error kind as a plain invoke.
        let err = context
            .dispatcher
            .dispatch(
                &Subject::from("plugin.demo"),
                LONG_RUNNING_JOB_METHOD,
                &json!({"timeWait": 30}),
            )
            .expect_err("no work payload");

        assert_eq!(err.kind(), ErrorKind::PauseProtocolViolation);
        assert_eq!(
            err.to_string(),
            "Long running job work must be a callable, but 'null' was received instead."
        );
        assert!(notifier.recorded().is_empty());
    }

    #[test]
    fn ordinary_capability_flows_through_invoke() {
        let (context, _notifier) = context_for("plugin.demo", &[GET_INTERFACE_STATE_METHOD]);

        let state = context
            .invoke(GET_INTERFACE_STATE_METHOD, &json!({"id": "abc"}))
            .expect("dispatch succeeds");

        assert_eq!(state, json!({}));
    }

    #[test]
    fn out_of_range_pause_window_reaches_the_watchdog_guard() {
        let (mut context, notifier) = context_for("plugin.demo", &[LONG_RUNNING_JOB_METHOD]);

        let err = context
            .long_running_job(&json!({"timeWait": 3601}), || ())
            .expect_err("window above ceiling");

        assert_eq!(err.kind(), ErrorKind::PauseProtocolViolation);
        assert_eq!(
            err.to_string(),
            "Long running job time can be only between 10 and 3600 seconds. \
             Received: 3601 seconds."
        );
        assert!(notifier.recorded().is_empty());
    }

    #[test]
    fn contexts_do_not_share_watchdog_state() {
        let (mut first, first_notifier) = context_for("plugin.a", &[LONG_RUNNING_JOB_METHOD]);
        let (mut second, second_notifier) = context_for("plugin.b", &[LONG_RUNNING_JOB_METHOD]);

        first
            .long_running_job(&json!({"timeWait": 30}), || {
                // While the first context is paused, the second still accepts
                // its own pause: state is per-context.
                second
                    .long_running_job(&json!({"timeWait": 30}), || ())
                    .expect("independent context pause");
            })
            .expect("outer pause");

        assert_eq!(first_notifier.recorded().len(), 2);
        assert_eq!(second_notifier.recorded().len(), 2);
    }
}
