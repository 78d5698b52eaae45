use crate::capability::{CapabilityRegistry, CapabilitySpec, Subject};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// Stable wire tags for the dispatch failure taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    MethodNotFound,
    InvalidParams,
    Unauthorized,
    HookError,
    PauseProtocolViolation,
}

impl ErrorKind {
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::MethodNotFound => "method_not_found",
            Self::InvalidParams => "invalid_params",
            Self::Unauthorized => "unauthorized",
            Self::HookError => "hook_error",
            Self::PauseProtocolViolation => "pause_protocol_violation",
        }
    }
}

/// Terminal failure for one capability call. Nothing in this taxonomy is
/// retried; a malformed or unauthorized request stays failed.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("method not found: {method}")]
    MethodNotFound { method: String },
    #[error("Invalid params: {message}")]
    InvalidParams { message: String },
    // Deliberately opaque so callers cannot probe the grant structure.
    #[error("not authorized")]
    Unauthorized,
    #[error("{message}")]
    HookError { message: String },
    #[error("{message}")]
    PauseProtocolViolation { message: String },
}

impl DispatchError {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MethodNotFound { .. } => ErrorKind::MethodNotFound,
            Self::InvalidParams { .. } => ErrorKind::InvalidParams,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::HookError { .. } => ErrorKind::HookError,
            Self::PauseProtocolViolation { .. } => ErrorKind::PauseProtocolViolation,
        }
    }
}

/// The external permission collaborator. Answers must be side-effect free;
/// the dispatcher never caches them. Caveat conformance folds into this
/// predicate: a grant carrying a caveat outside the capability's allowed
/// set answers `false`.
pub trait PermissionStore: Send + Sync {
    fn has_permission(&self, subject: &Subject, method: &str) -> bool;
}

/// Reference [`PermissionStore`]: per-subject grant sets with optional caveat
/// identifiers, plus per-method caveat restrictions copied from the registry
/// at wiring time.
#[derive(Default)]
pub struct GrantTable {
    grants: HashMap<Subject, HashMap<String, Vec<String>>>,
    restrictions: HashMap<String, Vec<String>>,
}

impl GrantTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant `method` to `subject` with no caveats attached.
    pub fn grant(&mut self, subject: impl Into<Subject>, method: &str) {
        self.grant_with_caveats(subject, method, Vec::new());
    }

    /// Grant `method` to `subject` with the given caveat-type identifiers
    /// attached. Re-granting replaces the previous caveat list.
    pub fn grant_with_caveats(
        &mut self,
        subject: impl Into<Subject>,
        method: &str,
        caveats: Vec<String>,
    ) {
        self.grants
            .entry(subject.into())
            .or_default()
            .insert(method.to_string(), caveats);
    }

    /// Revoke `method` from `subject`. No-ops when absent.
    pub fn revoke(&mut self, subject: &Subject, method: &str) {
        if let Some(methods) = self.grants.get_mut(subject) {
            methods.remove(method);
        }
    }

    /// Restrict the caveat types acceptable on grants for `method`.
    pub fn restrict(&mut self, method: &str, allowed: Vec<String>) {
        self.restrictions.insert(method.to_string(), allowed);
    }

    /// Copy every caveat restriction declared in `registry`, so that caveat
    /// conformance folds into [`PermissionStore::has_permission`].
    pub fn restrict_from(&mut self, registry: &CapabilityRegistry) {
        for spec in registry.specs() {
            if let Some(allowed) = spec.allowed_caveats() {
                self.restrict(spec.name(), allowed.to_vec());
            }
        }
    }
}

impl PermissionStore for GrantTable {
    fn has_permission(&self, subject: &Subject, method: &str) -> bool {
        let Some(caveats) = self.grants.get(subject).and_then(|m| m.get(method)) else {
            return false;
        };
        match self.restrictions.get(method) {
            None => true,
            Some(allowed) => {
                let allowed: HashSet<&str> = allowed.iter().map(String::as_str).collect();
                caveats.iter().all(|caveat| allowed.contains(caveat.as_str()))
            }
        }
    }
}

/// The validate → authorize → invoke pipeline over an immutable registry.
pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    permissions: Arc<dyn PermissionStore>,
}

impl Dispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>, permissions: Arc<dyn PermissionStore>) -> Self {
        Self {
            registry,
            permissions,
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Run the full pipeline for one request, short-circuiting on the first
    /// failure. The hook runs exactly once and only after lookup, schema
    /// validation, and authorization all passed.
    pub fn dispatch(
        &self,
        subject: &Subject,
        method: &str,
        raw_params: &Value,
    ) -> Result<Value, DispatchError> {
        let (spec, params) = self.authorize_call(subject, method, raw_params)?;
        debug!(%subject, method, "dispatching capability call");
        spec.invoke_hook(subject, params).map_err(|err| {
            warn!(%subject, method, %err, "capability hook failed");
            err
        })
    }

    /// The pipeline prefix shared with the watchdog's pause capability:
    /// registry lookup, params validation, and the authorization predicate,
    /// without invoking the bound hook.
    pub fn authorize_call(
        &self,
        subject: &Subject,
        method: &str,
        raw_params: &Value,
    ) -> Result<(&CapabilitySpec, Value), DispatchError> {
        let Some(spec) = self.registry.lookup(method) else {
            return Err(DispatchError::MethodNotFound {
                method: method.to_string(),
            });
        };

        let params = spec
            .validate_params(raw_params)
            .map_err(|message| DispatchError::InvalidParams { message })?;

        if !self.permissions.has_permission(subject, method) {
            warn!(%subject, method, "capability call rejected: subject lacks permission");
            return Err(DispatchError::Unauthorized);
        }

        Ok((spec, params))
    }
}
