//! The `capsule_getInterfaceState` capability: a params schema, a hooks
//! object owning the host-side effect, and a spec builder wiring the two
//! into a [`CapabilitySpec`].

use crate::capability::{schema_for, CapabilitySpec, Subject};
use crate::dispatch::DispatchError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub const GET_INTERFACE_STATE_METHOD: &str = "capsule_getInterfaceState";

/// Snapshot of one UI interface's component state, keyed by component name.
pub type ComponentState = serde_json::Map<String, Value>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GetInterfaceStateParams {
    pub id: String,
}

/// Host hooks needed by the method implementation. The hook is the sole owner
/// of interface-state lookup; the capability only validates and forwards.
pub trait InterfaceStateHooks: Send + Sync + 'static {
    fn get_interface_state(&self, subject: &Subject, id: &str) -> Result<ComponentState, String>;
}

/// Build the `capsule_getInterfaceState` specification. No caveat restriction
/// applies to this capability.
pub fn get_interface_state_spec(hooks: Arc<dyn InterfaceStateHooks>) -> CapabilitySpec {
    CapabilitySpec::new(
        GET_INTERFACE_STATE_METHOD,
        schema_for::<GetInterfaceStateParams>(),
        Box::new(move |subject, params| {
            let args: GetInterfaceStateParams =
                serde_json::from_value(params).map_err(|err| DispatchError::InvalidParams {
                    message: err.to_string(),
                })?;
            hooks
                .get_interface_state(subject, &args.id)
                .map(Value::Object)
                .map_err(|message| DispatchError::HookError { message })
        }),
    )
}
