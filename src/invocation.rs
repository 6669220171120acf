use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ErrorKind;

/// Default per-call deadline applied to operations that do not configure
/// their own timeout.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(30);

// ============ Fallback ============

/// Substitute result returned instead of an error for configured HTTP statuses.
///
/// The common case is mapping 404 to a null result so "get by id" operations
/// can model absence as a value. Statuses not listed here go through normal
/// error classification.
///
/// # Default
///
/// The default is [`propagate()`](Self::propagate): no status is substituted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fallback {
    /// Statuses that trigger the substitute value.
    statuses: Vec<u16>,
    /// Value returned in place of the response.
    value: serde_json::Value,
}

impl Fallback {
    /// No substitution; every non-success status is classified as an error.
    #[must_use]
    pub fn propagate() -> Self {
        Self {
            statuses: Vec::new(),
            value: serde_json::Value::Null,
        }
    }

    /// Substitute `null` for HTTP 404 responses.
    #[must_use]
    pub fn null_on_not_found() -> Self {
        Self {
            statuses: vec![404],
            value: serde_json::Value::Null,
        }
    }

    /// Substitute an arbitrary value for the given statuses.
    #[must_use]
    pub fn value_on(statuses: &[u16], value: serde_json::Value) -> Self {
        Self {
            statuses: statuses.to_vec(),
            value,
        }
    }

    /// The substitute value for `status`, if this fallback covers it.
    pub fn value_for(&self, status: u16) -> Option<serde_json::Value> {
        if self.statuses.contains(&status) {
            Some(self.value.clone())
        } else {
            None
        }
    }
}

impl Default for Fallback {
    fn default() -> Self {
        Self::propagate()
    }
}

// ============ Operation Spec ============

/// Declaration of a single remote operation within an interface.
///
/// The spec drives the dispatch pipeline: its timeout bounds the transport
/// exchange, its declared error kinds define the operation's error contract,
/// and its fallback substitutes results for selected statuses.
///
/// # Default
///
/// A new spec has a 30 second timeout, declares no error kinds and
/// propagates every error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSpec {
    /// Operation name, unique within its interface.
    pub name: String,
    /// Error kinds the operation declares as part of its contract.
    ///
    /// Errors of a declared kind pass through dispatch unchanged. Undeclared,
    /// non-infrastructure kinds are wrapped in
    /// [`RuntimeError::Undeclared`](crate::RuntimeError::Undeclared).
    pub declared_errors: Vec<ErrorKind>,
    /// Per-call deadline covering the full transport exchange, including
    /// transport-level retries.
    pub timeout: Duration,
    /// Substitute results for selected response statuses.
    pub fallback: Fallback,
}

impl OperationSpec {
    /// Create an operation spec with default timeout and no declarations.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_errors: Vec::new(),
            timeout: DEFAULT_DISPATCH_TIMEOUT,
            fallback: Fallback::propagate(),
        }
    }

    /// Add an error kind to the operation's declared contract.
    #[must_use]
    pub fn declares(mut self, kind: ErrorKind) -> Self {
        self.declared_errors.push(kind);
        self
    }

    /// Override the per-call deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the fallback applied to this operation's responses.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Fallback) -> Self {
        self.fallback = fallback;
        self
    }

    /// Whether `kind` is part of this operation's declared contract.
    #[must_use]
    pub fn declares_kind(&self, kind: ErrorKind) -> bool {
        self.declared_errors.contains(&kind)
    }
}

// ============ Interface Descriptor ============

/// Named table of [`OperationSpec`]s describing one provider interface.
///
/// Plays the role a reflective service interface would: clients are created
/// over a descriptor and may only call operations it lists. Descriptors with
/// the same name describe the same interface for purposes of client equality.
#[derive(Debug, Clone)]
pub struct InterfaceDescriptor {
    name: String,
    operations: HashMap<String, Arc<OperationSpec>>,
}

impl InterfaceDescriptor {
    /// Create an empty descriptor.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operations: HashMap::new(),
        }
    }

    /// Register an operation. A spec with an already-registered name replaces
    /// the previous one.
    #[must_use]
    pub fn operation(mut self, spec: OperationSpec) -> Self {
        self.operations.insert(spec.name.clone(), Arc::new(spec));
        self
    }

    /// Interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up an operation by name.
    pub fn get(&self, operation: &str) -> Option<&Arc<OperationSpec>> {
        self.operations.get(operation)
    }

    /// Names of all registered operations, sorted for stable error messages.
    pub fn operation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Whether the descriptor has no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

// ============ Invocation ============

/// One immutable call description: which interface, which operation, which
/// arguments.
///
/// Arguments are defensively copied into shared immutable storage at
/// construction. Later mutation of the caller's buffer cannot affect an
/// invocation, and clones share the same argument storage. `null` is a valid
/// argument and keeps its position.
#[derive(Debug, Clone)]
pub struct Invocation {
    interface: String,
    operation: Arc<OperationSpec>,
    args: Arc<[serde_json::Value]>,
}

impl Invocation {
    /// Capture a call against `operation` with the given arguments.
    pub fn new(
        interface: impl Into<String>,
        operation: Arc<OperationSpec>,
        args: &[serde_json::Value],
    ) -> Self {
        Self {
            interface: interface.into(),
            operation,
            args: args.into(),
        }
    }

    /// Name of the interface the call was made through.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Spec of the invoked operation.
    pub fn operation(&self) -> &OperationSpec {
        &self.operation
    }

    /// All arguments in call order.
    pub fn args(&self) -> &[serde_json::Value] {
        &self.args
    }

    /// Argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&serde_json::Value> {
        self.args.get(index)
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}/{}",
            self.interface,
            self.operation.name,
            self.args.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str) -> Arc<OperationSpec> {
        Arc::new(OperationSpec::new(name))
    }

    // ============ OperationSpec Test ============

    #[test]
    fn operation_defaults() {
        let op = OperationSpec::new("get_server");
        assert_eq!(op.name, "get_server");
        assert_eq!(op.timeout, Duration::from_secs(30));
        assert!(op.declared_errors.is_empty());
        assert_eq!(op.fallback, Fallback::propagate());
    }

    #[test]
    fn operation_declares_accumulates() {
        let op = OperationSpec::new("get_server")
            .declares(ErrorKind::NotFound)
            .declares(ErrorKind::InvalidParameter);
        assert!(op.declares_kind(ErrorKind::NotFound));
        assert!(op.declares_kind(ErrorKind::InvalidParameter));
        assert!(!op.declares_kind(ErrorKind::AuthenticationFailed));
    }

    #[test]
    fn operation_timeout_override() {
        let op = OperationSpec::new("slow_op").with_timeout(Duration::from_secs(120));
        assert_eq!(op.timeout, Duration::from_secs(120));
    }

    // ============ Fallback Test ============

    #[test]
    fn fallback_propagate_never_matches() {
        let f = Fallback::propagate();
        assert_eq!(f.value_for(404), None);
        assert_eq!(f.value_for(500), None);
    }

    #[test]
    fn fallback_null_on_not_found() {
        let f = Fallback::null_on_not_found();
        assert_eq!(f.value_for(404), Some(serde_json::Value::Null));
        assert_eq!(f.value_for(403), None);
        assert_eq!(f.value_for(200), None);
    }

    #[test]
    fn fallback_custom_value() {
        let f = Fallback::value_on(&[404, 410], json!({"items": []}));
        assert_eq!(f.value_for(404), Some(json!({"items": []})));
        assert_eq!(f.value_for(410), Some(json!({"items": []})));
        assert_eq!(f.value_for(400), None);
    }

    // ============ InterfaceDescriptor Test ============

    #[test]
    fn descriptor_lookup() {
        let iface = InterfaceDescriptor::new("Compute")
            .operation(OperationSpec::new("get_server"))
            .operation(OperationSpec::new("list_servers"));
        assert_eq!(iface.name(), "Compute");
        assert_eq!(iface.len(), 2);
        assert!(iface.get("get_server").is_some());
        assert!(iface.get("delete_server").is_none());
    }

    #[test]
    fn descriptor_duplicate_name_replaces() {
        let iface = InterfaceDescriptor::new("Compute")
            .operation(OperationSpec::new("get_server"))
            .operation(OperationSpec::new("get_server").with_timeout(Duration::from_secs(5)));
        assert_eq!(iface.len(), 1);
        let op = iface.get("get_server");
        assert!(op.is_some());
        let Some(op) = op else {
            return;
        };
        assert_eq!(op.timeout, Duration::from_secs(5));
    }

    #[test]
    fn descriptor_operation_names_sorted() {
        let iface = InterfaceDescriptor::new("Compute")
            .operation(OperationSpec::new("reboot"))
            .operation(OperationSpec::new("create"))
            .operation(OperationSpec::new("list"));
        assert_eq!(iface.operation_names(), vec!["create", "list", "reboot"]);
    }

    // ============ Invocation Test ============

    #[test]
    fn invocation_copies_args_defensively() {
        let mut args = vec![json!("server-1"), json!(600)];
        let inv = Invocation::new("Compute", spec("get_server"), &args);

        args[0] = json!("mutated");
        args.clear();

        assert_eq!(inv.args().len(), 2);
        assert_eq!(inv.arg(0), Some(&json!("server-1")));
        assert_eq!(inv.arg(1), Some(&json!(600)));
    }

    #[test]
    fn invocation_preserves_null_argument() {
        let args = vec![serde_json::Value::Null, json!("web-1")];
        let inv = Invocation::new("Compute", spec("create_server"), &args);
        assert_eq!(inv.arg(0), Some(&serde_json::Value::Null));
        assert_eq!(inv.arg(1), Some(&json!("web-1")));
        assert_eq!(inv.arg(2), None);
    }

    #[test]
    fn invocation_clone_shares_args() {
        let inv = Invocation::new("Compute", spec("get_server"), &[json!(1)]);
        let cloned = inv.clone();
        assert!(Arc::ptr_eq(&inv.args, &cloned.args));
        assert_eq!(cloned.interface(), "Compute");
    }

    #[test]
    fn invocation_display_format() {
        let inv = Invocation::new("Compute", spec("get_server"), &[json!("i-1"), json!(2)]);
        assert_eq!(inv.to_string(), "Compute.get_server/2");
    }
}
