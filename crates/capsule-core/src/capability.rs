use crate::dispatch::DispatchError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Identity of a calling plugin origin. Compared by value, used as the
/// permission-lookup key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subject(String);

impl Subject {
    pub fn new(origin: impl Into<String>) -> Self {
        Self(origin.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Subject {
    fn from(origin: &str) -> Self {
        Self(origin.to_string())
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionType {
    RestrictedMethod,
}

impl PermissionType {
    pub const fn as_tag(self) -> &'static str {
        match self {
            Self::RestrictedMethod => "restricted_method",
        }
    }
}

/// Structural validator for a method's raw params.
pub type ParamsValidator = Box<dyn Fn(&Value) -> Result<Value, String> + Send + Sync>;

/// Host-bound implementation of a capability, invoked once per successful
/// dispatch. A failing hook decides its own error kind; most fail with
/// [`DispatchError::HookError`].
pub type MethodHook = Box<dyn Fn(&Subject, Value) -> Result<Value, DispatchError> + Send + Sync>;

/// Build a [`ParamsValidator`] from a serde type. The type is expected to
/// carry `#[serde(deny_unknown_fields)]` so extra fields are rejected rather
/// than silently dropped.
pub fn schema_for<T>() -> ParamsValidator
where
    T: DeserializeOwned + Serialize,
{
    Box::new(|raw| {
        let typed: T = serde_json::from_value(raw.clone()).map_err(|err| err.to_string())?;
        serde_json::to_value(&typed).map_err(|err| err.to_string())
    })
}

/// Specification of one host-exposed operation: dispatch name, permission
/// requirements, params schema, and the bound host hook.
pub struct CapabilitySpec {
    name: String,
    permission_type: PermissionType,
    allowed_caveats: Option<Vec<String>>,
    params: ParamsValidator,
    hook: MethodHook,
}

impl CapabilitySpec {
    pub fn new(name: impl Into<String>, params: ParamsValidator, hook: MethodHook) -> Self {
        Self {
            name: name.into(),
            permission_type: PermissionType::RestrictedMethod,
            allowed_caveats: None,
            params,
            hook,
        }
    }

    /// Restrict the caveat types that may be attached to a grant for this
    /// capability. `None` (the default) means no restriction; an empty list
    /// is rejected at registry build time.
    pub fn with_allowed_caveats(mut self, caveats: Vec<String>) -> Self {
        self.allowed_caveats = Some(caveats);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn permission_type(&self) -> PermissionType {
        self.permission_type
    }

    pub fn allowed_caveats(&self) -> Option<&[String]> {
        self.allowed_caveats.as_deref()
    }

    pub(crate) fn validate_params(&self, raw: &Value) -> Result<Value, String> {
        (self.params)(raw)
    }

    pub(crate) fn invoke_hook(
        &self,
        subject: &Subject,
        params: Value,
    ) -> Result<Value, DispatchError> {
        (self.hook)(subject, params)
    }
}

impl fmt::Debug for CapabilitySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilitySpec")
            .field("name", &self.name)
            .field("permission_type", &self.permission_type)
            .field("allowed_caveats", &self.allowed_caveats)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("capability '{0}' is registered more than once")]
    DuplicateName(String),
    #[error("capability '{0}' declares an empty allowed-caveat set; use no restriction instead")]
    EmptyAllowedCaveats(String),
}

/// Immutable name → [`CapabilitySpec`] table. Built once at startup and
/// read-only afterwards, so concurrent dispatch reads need no locking.
pub struct CapabilityRegistry {
    specs: HashMap<String, CapabilitySpec>,
}

impl CapabilityRegistry {
    /// Build the registry, failing fast on configuration bugs: duplicate
    /// method names or an empty (rather than absent) caveat restriction.
    pub fn build(specs: Vec<CapabilitySpec>) -> Result<Self, RegistryError> {
        let mut table = HashMap::with_capacity(specs.len());
        for spec in specs {
            if matches!(spec.allowed_caveats.as_deref(), Some([])) {
                return Err(RegistryError::EmptyAllowedCaveats(spec.name));
            }
            let name = spec.name.clone();
            if table.insert(name.clone(), spec).is_some() {
                return Err(RegistryError::DuplicateName(name));
            }
        }
        Ok(Self { specs: table })
    }

    /// Pure map read; a miss is an ordinary outcome the dispatcher maps to a
    /// protocol-level error.
    pub fn lookup(&self, name: &str) -> Option<&CapabilitySpec> {
        self.specs.get(name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn specs(&self) -> impl Iterator<Item = &CapabilitySpec> {
        self.specs.values()
    }

    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.specs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
