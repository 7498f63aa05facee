// consent-mgt-core/src/runtime/events.rs
// ============================================================================
// Module: Consent Event Sinks
// Description: JSON-lines sinks for committed consent events.
// Purpose: Route audit notifications without a hard logging dependency.
// Dependencies: crate::interfaces, serde_json
// ============================================================================

//! ## Overview
//! Sinks receive [`ConsentEvent`]s after the owning transaction commits.
//! They never fail the caller: serialization or I/O problems drop the event.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::interfaces::ConsentEvent;
use crate::interfaces::ConsentEventSink;

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Sink that logs JSON lines to stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrEventSink;

impl ConsentEventSink for StderrEventSink {
    fn record(&self, event: &ConsentEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Sink that appends JSON lines to a file.
#[derive(Debug)]
pub struct FileEventSink {
    /// File handle used for append-only logging.
    file: Mutex<File>,
}

impl FileEventSink {
    /// Opens the event log in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl ConsentEventSink for FileEventSink {
    fn record(&self, event: &ConsentEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// Sink that discards events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl ConsentEventSink for NoopEventSink {
    fn record(&self, _event: &ConsentEvent) {}
}
