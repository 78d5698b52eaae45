use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::mpsc::Sender;
use std::sync::Mutex;

/// One-way message from a sandboxed execution context to the host. The host
/// never acknowledges; the sandbox never observes a return value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

/// Fire-and-forget notification sink. Implementations must tolerate a missing
/// or slow consumer without surfacing an error to the sandbox.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// [`Notifier`] backed by an mpsc channel to the host's timer/event loop.
/// A disconnected receiver is silently ignored.
pub struct ChannelNotifier {
    tx: Mutex<Sender<Notification>>,
}

impl ChannelNotifier {
    pub fn new(tx: Sender<Notification>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        if let Ok(tx) = self.tx.lock() {
            let _ = tx.send(notification);
        }
    }
}

/// In-memory [`Notifier`] that records everything it is handed, in order.
/// Used by the crate's own tests and by host harnesses.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorded(&self) -> Vec<Notification> {
        self.events.lock().expect("notification log lock").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.events
            .lock()
            .expect("notification log lock")
            .push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::mpsc;

    #[test]
    fn channel_notifier_delivers_in_order() {
        let (tx, rx) = mpsc::channel();
        let notifier = ChannelNotifier::new(tx);

        notifier.notify(Notification {
            method: "First".to_string(),
            params: json!({"n": 1}),
        });
        notifier.notify(Notification {
            method: "Second".to_string(),
            params: json!({"n": 2}),
        });

        assert_eq!(rx.recv().expect("first notification").method, "First");
        assert_eq!(rx.recv().expect("second notification").method, "Second");
    }

    #[test]
    fn channel_notifier_ignores_disconnected_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let notifier = ChannelNotifier::new(tx);

        // Must not panic or error out.
        notifier.notify(Notification {
            method: "Dropped".to_string(),
            params: Value::Null,
        });
    }

    #[test]
    fn notification_serializes_as_method_and_params() {
        let notification = Notification {
            method: "TimerPauseRequest".to_string(),
            params: json!({"timerAction": "pause", "timeWait": 30}),
        };
        let json = serde_json::to_value(&notification).expect("serialize notification");
        assert_eq!(
            json,
            json!({
                "method": "TimerPauseRequest",
                "params": {"timerAction": "pause", "timeWait": 30}
            })
        );
    }
}
