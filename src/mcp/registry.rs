//! Capability Registry
//!
//! Owns every registered tool and resource. Names are unique, listing order is
//! registration order, and schemas are compiled once at registration.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jsonschema::error::ValidationErrorKind;
use jsonschema::{JSONSchema, ValidationError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use super::context::HandlerContext;
use super::error::{FieldViolation, InvocationError};

pub const DEFAULT_CAPABILITY_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Handler Types
// ============================================================================

/// Result type for capability execution
pub type HandlerResult = Result<Value, InvocationError>;

/// Boxed future for async capability execution
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// Capability handler function type
pub type CapabilityHandler = Arc<dyn Fn(HandlerContext, Value) -> HandlerFuture + Send + Sync>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Capability already registered: {0}")]
    DuplicateCapability(String),

    #[error("Capability not found: {0}")]
    NotFound(String),

    #[error("Invalid {which} schema for capability {name}: {reason}")]
    InvalidSchema {
        name: String,
        which: &'static str,
        reason: String,
    },

    #[error("Registry is closed, cannot register {0}")]
    Closed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Tool,
    Resource,
}

// ============================================================================
// Descriptor
// ============================================================================

/// A registered capability with metadata, compiled schemas and handler
pub struct CapabilityDescriptor {
    pub name: String,
    pub kind: CapabilityKind,
    pub description: String,
    /// URI pattern, resources only
    pub uri: Option<String>,
    pub mime_type: Option<String>,
    pub input_schema: Value,
    pub output_schema: Value,
    /// Empty means the capability is public
    pub required_scopes: BTreeSet<String>,
    timeout: Option<Duration>,
    input_validator: JSONSchema,
    output_validator: JSONSchema,
    handler: CapabilityHandler,
}

impl CapabilityDescriptor {
    pub fn is_public(&self) -> bool {
        self.required_scopes.is_empty()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout.unwrap_or(DEFAULT_CAPABILITY_TIMEOUT)
    }

    pub fn handler(&self) -> &CapabilityHandler {
        &self.handler
    }

    pub fn validate_arguments(&self, arguments: &Value) -> Result<(), Vec<FieldViolation>> {
        collect_violations(&self.input_validator, arguments)
    }

    pub fn validate_output(&self, output: &Value) -> Result<(), Vec<FieldViolation>> {
        collect_violations(&self.output_validator, output)
    }

    pub fn info(&self) -> CapabilityInfo<'_> {
        CapabilityInfo {
            name: &self.name,
            kind: self.kind,
            description: &self.description,
            uri: self.uri.as_deref(),
            mime_type: self.mime_type.as_deref(),
            input_schema: &self.input_schema,
            output_schema: &self.output_schema,
            required_scopes: self.required_scopes.iter().map(String::as_str).collect(),
            timeout_ms: self.timeout().as_millis() as u64,
        }
    }
}

impl fmt::Debug for CapabilityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("uri", &self.uri)
            .field("required_scopes", &self.required_scopes)
            .field("timeout", &self.timeout())
            .finish_non_exhaustive()
    }
}

fn compile_schema(name: &str, which: &'static str, schema: &Value) -> Result<JSONSchema, RegistryError> {
    JSONSchema::compile(schema).map_err(|e| RegistryError::InvalidSchema {
        name: name.to_string(),
        which,
        reason: e.to_string(),
    })
}

fn collect_violations(schema: &JSONSchema, value: &Value) -> Result<(), Vec<FieldViolation>> {
    match schema.validate(value) {
        Ok(()) => Ok(()),
        Err(errors) => Err(errors.map(|e| violation_from(&e)).collect()),
    }
}

fn violation_from(error: &ValidationError<'_>) -> FieldViolation {
    let mut field = error.instance_path.to_string();
    // A missing property is reported against its parent object; point at the
    // property itself instead.
    if let ValidationErrorKind::Required { property } = &error.kind {
        match property.as_str() {
            Some(name) => field = format!("{}/{}", field, name),
            None => field = format!("{}/{}", field, property),
        }
    }
    if field.is_empty() {
        field.push('/');
    }
    FieldViolation::new(field, error.to_string())
}

/// Serializable metadata view of a capability (no handler, no validators)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityInfo<'a> {
    pub name: &'a str,
    pub kind: CapabilityKind,
    pub description: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<&'a str>,
    pub input_schema: &'a Value,
    pub output_schema: &'a Value,
    pub required_scopes: Vec<&'a str>,
    pub timeout_ms: u64,
}

// ============================================================================
// Registry
// ============================================================================

/// Configuration-driven adjustments applied as capabilities are registered
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityOverride {
    pub timeout: Option<Duration>,
    pub required_scopes: Option<BTreeSet<String>>,
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub default_timeout: Duration,
    pub allow_hot_registration: bool,
    pub overrides: HashMap<String, CapabilityOverride>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_CAPABILITY_TIMEOUT,
            allow_hot_registration: false,
            overrides: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    ordered: Vec<Arc<CapabilityDescriptor>>,
    by_name: HashMap<String, usize>,
}

/// Registry for tools and resources
pub struct CapabilityRegistry {
    inner: RwLock<RegistryInner>,
    closed: AtomicBool,
    settings: RegistrySettings,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::with_settings(RegistrySettings::default())
    }

    pub fn with_settings(settings: RegistrySettings) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            closed: AtomicBool::new(false),
            settings,
        }
    }

    /// Register a capability. Fails on a duplicate name, or once the
    /// registry is closed unless hot registration is enabled.
    pub fn register(&self, mut descriptor: CapabilityDescriptor) -> Result<(), RegistryError> {
        if self.is_closed() && !self.settings.allow_hot_registration {
            return Err(RegistryError::Closed(descriptor.name));
        }

        self.apply_overrides(&mut descriptor);

        let mut inner = self.inner.write();
        if inner.by_name.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateCapability(descriptor.name));
        }

        debug!(
            "Registering {:?} {} (timeout {:?}, scopes {:?})",
            descriptor.kind,
            descriptor.name,
            descriptor.timeout(),
            descriptor.required_scopes
        );
        let index = inner.ordered.len();
        inner.by_name.insert(descriptor.name.clone(), index);
        inner.ordered.push(Arc::new(descriptor));
        Ok(())
    }

    fn apply_overrides(&self, descriptor: &mut CapabilityDescriptor) {
        if descriptor.timeout.is_none() {
            descriptor.timeout = Some(self.settings.default_timeout);
        }
        if let Some(over) = self.settings.overrides.get(&descriptor.name) {
            if let Some(timeout) = over.timeout {
                descriptor.timeout = Some(timeout);
            }
            if let Some(scopes) = &over.required_scopes {
                descriptor.required_scopes = scopes.clone();
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<CapabilityDescriptor>, RegistryError> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .map(|&index| inner.ordered[index].clone())
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Find the resource whose URI pattern matches `uri`. First registered wins.
    pub fn find_resource(&self, uri: &str) -> Option<Arc<CapabilityDescriptor>> {
        self.inner
            .read()
            .ordered
            .iter()
            .find(|d| {
                d.kind == CapabilityKind::Resource
                    && d.uri.as_deref().is_some_and(|pattern| matches_uri_pattern(pattern, uri))
            })
            .cloned()
    }

    /// Resolve by name, or by resource URI when the name looks like one.
    pub fn resolve(&self, name_or_uri: &str) -> Result<Arc<CapabilityDescriptor>, RegistryError> {
        match self.lookup(name_or_uri) {
            Ok(descriptor) => Ok(descriptor),
            Err(err) if name_or_uri.contains("://") => {
                self.find_resource(name_or_uri).ok_or(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Snapshot of the registered capabilities in registration order.
    pub fn list(&self) -> CapabilityList {
        CapabilityList {
            entries: self.inner.read().ordered.clone(),
        }
    }

    /// Seal the registry. Further registration fails unless hot registration
    /// is enabled.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("Capability registry closed with {} capabilities", self.len());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.inner.read().ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tool_count(&self) -> usize {
        self.count_kind(CapabilityKind::Tool)
    }

    pub fn resource_count(&self) -> usize {
        self.count_kind(CapabilityKind::Resource)
    }

    fn count_kind(&self, kind: CapabilityKind) -> usize {
        self.inner.read().ordered.iter().filter(|d| d.kind == kind).count()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Finite, restartable listing of capability metadata
#[derive(Clone)]
pub struct CapabilityList {
    entries: Vec<Arc<CapabilityDescriptor>>,
}

impl CapabilityList {
    pub fn iter(&self) -> impl Iterator<Item = CapabilityInfo<'_>> + '_ {
        self.entries.iter().map(|d| d.info())
    }

    pub fn descriptors(&self) -> &[Arc<CapabilityDescriptor>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Check if a URI matches a pattern with {param} placeholders
pub fn matches_uri_pattern(pattern: &str, uri: &str) -> bool {
    let pattern_parts: Vec<&str> = pattern.split('/').collect();
    let uri_parts: Vec<&str> = uri.split('/').collect();

    if pattern_parts.len() != uri_parts.len() {
        return false;
    }

    pattern_parts
        .iter()
        .zip(uri_parts.iter())
        .all(|(p, u)| (p.starts_with('{') && p.ends_with('}')) || p == u)
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for a tool or resource descriptor
pub struct CapabilityBuilder {
    name: String,
    kind: CapabilityKind,
    description: String,
    uri: Option<String>,
    mime_type: Option<String>,
    input_schema: Value,
    output_schema: Value,
    required_scopes: BTreeSet<String>,
    timeout: Option<Duration>,
}

impl CapabilityBuilder {
    pub fn tool(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: CapabilityKind::Tool,
            description: String::new(),
            uri: None,
            mime_type: None,
            input_schema: json!({
                "type": "object",
                "properties": {}
            }),
            output_schema: json!({}),
            required_scopes: BTreeSet::new(),
            timeout: None,
        }
    }

    pub fn resource(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: CapabilityKind::Resource,
            uri: Some(uri.into()),
            mime_type: Some("application/json".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "uri": { "type": "string" }
                }
            }),
            ..Self::tool(name)
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.required_scopes.insert(scope.into());
        self
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_scopes.extend(scopes.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build<F, Fut>(self, handler: F) -> Result<CapabilityDescriptor, RegistryError>
    where
        F: Fn(HandlerContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let input_validator = compile_schema(&self.name, "input", &self.input_schema)?;
        let output_validator = compile_schema(&self.name, "output", &self.output_schema)?;

        Ok(CapabilityDescriptor {
            name: self.name,
            kind: self.kind,
            description: self.description,
            uri: self.uri,
            mime_type: self.mime_type,
            input_schema: self.input_schema,
            output_schema: self.output_schema,
            required_scopes: self.required_scopes,
            timeout: self.timeout,
            input_validator,
            output_validator,
            handler: Arc::new(move |ctx, args| Box::pin(handler(ctx, args))),
        })
    }
}
