//! Capability-gated plugin sandbox core.
//!
//! Untrusted plugin code runs inside an isolated execution context and can
//! reach the host only through named, permission-gated capabilities. Every
//! call flows through one pipeline of lookup, validation, authorization,
//! and hook invocation; the execution-lifetime watchdog's pause/resume
//! protocol rides that pipeline like a regular capability.

pub mod capability;
pub mod context;
pub mod dispatch;
pub mod interface_state;
pub mod notify;
pub mod transport;
pub mod watchdog;
pub mod wire;
