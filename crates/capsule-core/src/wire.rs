use crate::dispatch::DispatchError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SANDBOX_PROTOCOL_VERSION: u32 = 1;

/// Wire mirror of [`DispatchError`]: a stable kind tag plus the human
/// message. No stack traces or internal identifiers cross this boundary.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireError {
    pub kind: String,
    pub message: String,
}

impl From<&DispatchError> for WireError {
    fn from(err: &DispatchError) -> Self {
        Self {
            kind: err.kind().as_tag().to_string(),
            message: err.to_string(),
        }
    }
}

/// Newline-delimited JSON messages between the host and a sandbox worker
/// process. Host → worker: `Hello`, `Invoke`, `Shutdown`. Worker → host:
/// `HelloAck`, `InvokeResult`, `Notify`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SandboxWireMessage {
    Hello {
        protocol_version: u32,
        subject: String,
    },
    HelloAck {
        protocol_version: u32,
        accepted: bool,
        reason: Option<String>,
        #[serde(default)]
        methods: Vec<String>,
    },
    Invoke {
        request_id: String,
        method: String,
        params: Value,
    },
    InvokeResult {
        request_id: String,
        ok: bool,
        #[serde(default)]
        result: Option<Value>,
        #[serde(default)]
        error: Option<WireError>,
    },
    Notify {
        method: String,
        params: Value,
    },
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ErrorKind;
    use serde_json::json;

    #[test]
    fn invoke_roundtrip() {
        let message = SandboxWireMessage::Invoke {
            request_id: "req-1".to_string(),
            method: "capsule_getInterfaceState".to_string(),
            params: json!({"id": "abc"}),
        };

        let encoded = serde_json::to_string(&message).expect("serialize invoke");
        let parsed: SandboxWireMessage = serde_json::from_str(&encoded).expect("parse invoke");
        assert_eq!(parsed, message);
    }

    #[test]
    fn invoke_result_backwards_compatible_without_optional_fields() {
        let encoded = r#"{"kind":"invoke_result","request_id":"req-1","ok":true}"#;
        let parsed: SandboxWireMessage =
            serde_json::from_str(encoded).expect("parse legacy invoke result");

        match parsed {
            SandboxWireMessage::InvokeResult {
                request_id,
                ok,
                result,
                error,
            } => {
                assert_eq!(request_id, "req-1");
                assert!(ok);
                assert!(result.is_none());
                assert!(error.is_none());
            }
            _ => panic!("unexpected message kind"),
        }
    }

    #[test]
    fn hello_ack_backwards_compatible_without_methods() {
        let encoded =
            r#"{"kind":"hello_ack","protocol_version":1,"accepted":true,"reason":null}"#;
        let parsed: SandboxWireMessage =
            serde_json::from_str(encoded).expect("parse legacy hello ack");

        assert!(matches!(
            parsed,
            SandboxWireMessage::HelloAck { accepted: true, ref methods, .. } if methods.is_empty()
        ));
    }

    #[test]
    fn dispatch_errors_carry_stable_kind_tags() {
        let err = DispatchError::Unauthorized;
        let wire = WireError::from(&err);
        assert_eq!(wire.kind, "unauthorized");
        assert_eq!(wire.message, "not authorized");

        let err = DispatchError::MethodNotFound {
            method: "capsule_ghost".to_string(),
        };
        let wire = WireError::from(&err);
        assert_eq!(wire.kind, ErrorKind::MethodNotFound.as_tag());
        assert_eq!(wire.message, "method not found: capsule_ghost");
    }

    #[test]
    fn notify_line_matches_timer_pause_request_shape() {
        let message = SandboxWireMessage::Notify {
            method: "TimerPauseRequest".to_string(),
            params: json!({"timerAction": "pause", "timeWait": 30}),
        };
        let encoded = serde_json::to_value(&message).expect("serialize notify");
        assert_eq!(encoded["kind"], "notify");
        assert_eq!(encoded["params"]["timerAction"], "pause");
    }
}
