use crate::wire::SandboxWireMessage;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Failures of the pipe to the sandbox process, distinct from dispatch
/// failures of any capability call carried over it.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("sandbox stdio is not piped")]
    NotPiped,
    #[error("sandbox pipe is closed")]
    Closed,
    #[error("bad frame: {0}")]
    BadFrame(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub trait SandboxTransport {
    fn send(&mut self, message: &SandboxWireMessage) -> Result<(), TransportError>;
    fn receive(&mut self, timeout: Duration) -> Result<Option<SandboxWireMessage>, TransportError>;
    fn terminate(&mut self);
}

fn encode_frame(message: &SandboxWireMessage) -> Result<String, TransportError> {
    let mut frame = serde_json::to_string(message)?;
    frame.push('\n');
    Ok(frame)
}

fn decode_frame(frame: &str) -> Result<SandboxWireMessage, TransportError> {
    Ok(serde_json::from_str(frame)?)
}

type FrameResult = Result<SandboxWireMessage, TransportError>;

fn spawn_frame_pump(stdout: impl Read + Send + 'static) -> (Receiver<FrameResult>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel();
    let pump = thread::spawn(move || pump_frames(stdout, tx));
    (rx, pump)
}

/// Reads newline-delimited frames until EOF or a read error. Malformed
/// frames are reported in-band and pumping continues.
fn pump_frames(stdout: impl Read, tx: Sender<FrameResult>) {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let frame = line.trim();
                if frame.is_empty() {
                    continue;
                }
                if tx.send(decode_frame(frame)).is_err() {
                    break;
                }
            }
            Err(err) => {
                let _ = tx.send(Err(TransportError::Io(err)));
                break;
            }
        }
    }
}

/// Transport over a spawned sandbox worker's piped stdio.
pub struct StdioProcessTransport {
    child: Child,
    stdin: ChildStdin,
    frames: Receiver<FrameResult>,
    pump: Option<JoinHandle<()>>,
}

impl StdioProcessTransport {
    pub fn from_child(mut child: Child) -> Result<Self, TransportError> {
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(TransportError::NotPiped);
        };

        let (frames, pump) = spawn_frame_pump(stdout);
        Ok(Self {
            child,
            stdin,
            frames,
            pump: Some(pump),
        })
    }
}

impl SandboxTransport for StdioProcessTransport {
    fn send(&mut self, message: &SandboxWireMessage) -> Result<(), TransportError> {
        let frame = encode_frame(message)?;
        self.stdin.write_all(frame.as_bytes())?;
        self.stdin.flush()?;
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Option<SandboxWireMessage>, TransportError> {
        match self.frames.recv_timeout(timeout) {
            Ok(frame) => frame.map(Some),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn terminate(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        // The pump sees EOF once the child is gone.
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }
}
