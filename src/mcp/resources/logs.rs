//! Recent Logs
//!
//! A `tracing` layer keeps the last few INFO-and-above events in a ring
//! buffer, and the `logs://recent` resource serves them to admins.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::mcp::context::HandlerContext;
use crate::mcp::error::InvocationError;
use crate::mcp::registry::{CapabilityBuilder, CapabilityRegistry, HandlerResult, RegistryError};

pub const LOGS_URI: &str = "logs://recent";

pub const DEFAULT_LOG_CAPACITY: usize = 100;
const DEFAULT_RETURNED: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

/// Bounded buffer of recent log entries, oldest first. Clones share storage.
#[derive(Debug, Clone)]
pub struct RecentLogs {
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
    capacity: usize,
}

impl Default for RecentLogs {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_CAPACITY)
    }
}

impl RecentLogs {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn push(&self, entry: LogEntry) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// The newest `count` entries, oldest first.
    pub fn recent(&self, count: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(count);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Layer that feeds this buffer
    pub fn layer(&self) -> RecentLogsLayer {
        RecentLogsLayer { logs: self.clone() }
    }
}

pub struct RecentLogsLayer {
    logs: RecentLogs,
}

#[derive(Default)]
struct EntryVisitor {
    message: String,
    fields: BTreeMap<String, String>,
}

impl EntryVisitor {
    fn put(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for EntryVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{:?}", value));
    }
}

impl<S: Subscriber> Layer<S> for RecentLogsLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > Level::INFO {
            return;
        }
        let mut visitor = EntryVisitor::default();
        event.record(&mut visitor);
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Debug, Deserialize)]
struct LogsParams {
    #[serde(default)]
    count: Option<usize>,
}

/// Admin-only view of the newest captured log entries.
pub fn register_resources(registry: &CapabilityRegistry, logs: RecentLogs) -> Result<(), RegistryError> {
    let resource = CapabilityBuilder::resource(LOGS_URI, "recent_logs")
        .description("Most recent server log entries, INFO and above")
        .scope("admin")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "uri": { "type": "string" },
                "count": { "type": "integer", "minimum": 1 }
            }
        }))
        .build(move |_ctx: HandlerContext, params: Value| {
            let logs = logs.clone();
            async move { read_logs(&logs, params) }
        })?;
    registry.register(resource)
}

fn read_logs(logs: &RecentLogs, params: Value) -> HandlerResult {
    let params: LogsParams =
        serde_json::from_value(params).map_err(|e| InvocationError::invalid("/count", e.to_string()))?;
    let entries = logs.recent(params.count.unwrap_or(DEFAULT_RETURNED));
    Ok(json!({
        "totalCaptured": logs.len(),
        "returnedCount": entries.len(),
        "maxBufferSize": logs.capacity(),
        "logs": entries,
    }))
}
