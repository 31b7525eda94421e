//! Append-only audit trail of migration phases.
//!
//! A sink failure never reaches the caller: it is counted and reported through
//! `tracing`, and the migration carries on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("audit sink poisoned")]
    Poisoned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub at: DateTime<Utc>,
    pub message: String,
    pub fields: serde_json::Value,
}

pub trait AuditSink: Send + Sync {
    fn append(&self, event: &AuditEvent) -> Result<(), AuditError>;
}

/// Emits each event as a `tracing` info event on the `rosterd::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        info!(target: "rosterd::audit", fields = %event.fields, "{}", event.message);
        Ok(())
    }
}

/// One JSON object per line, synced after every write.
pub struct JsonlAuditSink {
    file: Mutex<File>,
}

impl JsonlAuditSink {
    pub fn open(path: &Path) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(JsonlAuditSink {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for JsonlAuditSink {
    fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let line = serde_json::to_string(event)?;
        let mut file = self.file.lock().map_err(|_| AuditError::Poisoned)?;
        writeln!(file, "{}", line)?;
        file.sync_data()?;
        Ok(())
    }
}

/// Keeps events in memory; clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        match self.events.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.message).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .map_err(|_| AuditError::Poisoned)?
            .push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct AuditLogger {
    sinks: Vec<Box<dyn AuditSink>>,
    failures: AtomicUsize,
}

impl AuditLogger {
    /// Logger with no sinks; events are dropped.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracing() -> Self {
        AuditLogger::new().with_sink(TracingAuditSink)
    }

    pub fn with_sink(mut self, sink: impl AuditSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn log(&self, message: &str, fields: serde_json::Value) {
        let event = AuditEvent {
            at: Utc::now(),
            message: message.to_string(),
            fields,
        };
        for sink in &self.sinks {
            if let Err(e) = sink.append(&event) {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, audit_message = message, "audit sink failed");
            }
        }
    }

    /// Number of sink writes that failed since creation.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}
