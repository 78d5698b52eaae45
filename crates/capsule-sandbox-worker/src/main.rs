//! Sandbox-side worker for integration tests and local experiments. Speaks
//! newline-delimited JSON on stdio: the host sends `Hello`/`Invoke`/
//! `Shutdown`, the worker answers with `HelloAck`/`InvokeResult` and forwards
//! watchdog notifications as `Notify` lines. Behavior is scripted through
//! `CAPSULE_WORKER_*` environment variables so tests can drive edge cases.

use anyhow::Context as _;
use capsule_core::capability::{CapabilityRegistry, Subject};
use capsule_core::context::{long_running_job_spec, ExecutionContext, LONG_RUNNING_JOB_METHOD};
use capsule_core::dispatch::{Dispatcher, GrantTable};
use capsule_core::interface_state::{
    get_interface_state_spec, ComponentState, InterfaceStateHooks, GET_INTERFACE_STATE_METHOD,
};
use capsule_core::notify::{Notification, Notifier};
use capsule_core::wire::{SandboxWireMessage, WireError, SANDBOX_PROTOCOL_VERSION};
use serde_json::{json, Value};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Forwards watchdog notifications to the host as `Notify` wire lines, in
/// emission order, interleaved correctly with the eventual `InvokeResult`.
struct StdoutNotifier;

impl Notifier for StdoutNotifier {
    fn notify(&self, notification: Notification) {
        let message = SandboxWireMessage::Notify {
            method: notification.method,
            params: notification.params,
        };
        // Fire-and-forget: a vanished host is not the sandbox's problem.
        let _ = write_message(&mut io::stdout().lock(), &message);
    }
}

struct EnvInterfaceState;

impl InterfaceStateHooks for EnvInterfaceState {
    fn get_interface_state(&self, _subject: &Subject, id: &str) -> Result<ComponentState, String> {
        if let Ok(raw) = std::env::var("CAPSULE_WORKER_INTERFACE_STATE_ERROR") {
            if !raw.trim().is_empty() {
                return Err(raw);
            }
        }

        let mut state = std::env::var("CAPSULE_WORKER_INTERFACE_STATE_JSON")
            .ok()
            .and_then(|raw| serde_json::from_str::<ComponentState>(&raw).ok())
            .unwrap_or_else(|| {
                let mut defaults = ComponentState::new();
                defaults.insert("input-field".to_string(), json!("typed text"));
                defaults
            });
        state.insert("id".to_string(), json!(id));
        Ok(state)
    }
}

fn granted_methods() -> Vec<String> {
    std::env::var("CAPSULE_WORKER_GRANTS")
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect::<Vec<_>>()
        })
        .unwrap_or_else(|| {
            vec![
                GET_INTERFACE_STATE_METHOD.to_string(),
                LONG_RUNNING_JOB_METHOD.to_string(),
            ]
        })
}

fn build_context(subject: &str) -> anyhow::Result<ExecutionContext> {
    let registry = Arc::new(
        CapabilityRegistry::build(vec![
            get_interface_state_spec(Arc::new(EnvInterfaceState)),
            long_running_job_spec(),
        ])
        .context("build capability registry")?,
    );

    let mut grants = GrantTable::new();
    for method in granted_methods() {
        grants.grant(subject, &method);
    }
    grants.restrict_from(&registry);

    let dispatcher = Arc::new(Dispatcher::new(registry, Arc::new(grants)));
    Ok(ExecutionContext::new(
        Subject::new(subject),
        dispatcher,
        Arc::new(StdoutNotifier),
    ))
}

fn handle_invoke(context: &mut ExecutionContext, method: &str, params: &Value) -> SandboxWireMessage {
    let work_delay_ms = std::env::var("CAPSULE_WORKER_WORK_DELAY_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    let outcome = if method == LONG_RUNNING_JOB_METHOD {
        context.long_running_job(params, || {
            if work_delay_ms > 0 {
                thread::sleep(Duration::from_millis(work_delay_ms));
            }
            json!({"done": true})
        })
    } else {
        context.invoke(method, params)
    };

    match outcome {
        Ok(result) => SandboxWireMessage::InvokeResult {
            request_id: String::new(),
            ok: true,
            result: Some(result),
            error: None,
        },
        Err(err) => {
            warn!(method, %err, "invoke failed");
            SandboxWireMessage::InvokeResult {
                request_id: String::new(),
                ok: false,
                result: None,
                error: Some(WireError::from(&err)),
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut context: Option<ExecutionContext> = None;

    for line in stdin.lock().lines() {
        let line = line.context("read host stdin")?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let message = match serde_json::from_str::<SandboxWireMessage>(trimmed) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "dropping malformed host message");
                break;
            }
        };

        match message {
            SandboxWireMessage::Hello {
                protocol_version,
                subject,
            } => {
                let accepted = protocol_version == SANDBOX_PROTOCOL_VERSION;
                let (reason, methods) = if accepted {
                    context = Some(build_context(&subject)?);
                    (None, granted_methods())
                } else {
                    (
                        Some(format!(
                            "unsupported protocol version {protocol_version}, worker speaks {SANDBOX_PROTOCOL_VERSION}"
                        )),
                        Vec::new(),
                    )
                };

                debug!(subject, accepted, "host hello");
                write_message(
                    &mut stdout,
                    &SandboxWireMessage::HelloAck {
                        protocol_version: SANDBOX_PROTOCOL_VERSION,
                        accepted,
                        reason,
                        methods,
                    },
                )?;
            }
            SandboxWireMessage::Invoke {
                request_id,
                method,
                params,
            } => {
                let Some(context) = context.as_mut() else {
                    warn!("invoke before hello, shutting down");
                    break;
                };

                let mut response = handle_invoke(context, &method, &params);
                if let SandboxWireMessage::InvokeResult {
                    request_id: slot, ..
                } = &mut response
                {
                    *slot = request_id;
                }
                write_message(&mut stdout, &response)?;
            }
            SandboxWireMessage::Shutdown => break,
            SandboxWireMessage::HelloAck { .. }
            | SandboxWireMessage::InvokeResult { .. }
            | SandboxWireMessage::Notify { .. } => {}
        }
    }

    Ok(())
}

fn write_message(stdout: &mut impl Write, message: &SandboxWireMessage) -> io::Result<()> {
    let payload = serde_json::to_string(message).map_err(io::Error::other)?;
    stdout.write_all(payload.as_bytes())?;
    stdout.write_all(b"\n")?;
    stdout.flush()
}
