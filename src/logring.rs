//! In-memory ring of recent log lines, served by the log endpoint.
//!
//! [`RingLayer`] plugs into the `tracing_subscriber` registry next to the
//! fmt layer and copies every event that passes the filter into the ring.
//! Messages are made JSON-safe on the way in.

use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::json::sanitize;

/// Longest message kept per entry.
const MAX_MESSAGE_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Increases by one per entry, starting at 1.
    pub seq: u64,
    /// Seconds since the Unix epoch.
    pub at: u64,
    pub level: Level,
    pub message: String,
}

#[derive(Debug)]
struct Inner {
    entries: VecDeque<LogEntry>,
    next_seq: u64,
}

/// Bounded log buffer; the oldest entry is dropped when full.
#[derive(Debug)]
pub struct LogRing {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(capacity),
                next_seq: 1,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a message and returns its sequence number.
    pub fn push(&self, level: Level, message: &str) -> u64 {
        let mut message = sanitize(message).into_owned();
        truncate(&mut message, MAX_MESSAGE_LEN);
        let at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut inner = self.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        if inner.entries.len() == self.capacity {
            inner.entries.pop_front();
        }
        inner.entries.push_back(LogEntry {
            seq,
            at,
            level,
            message,
        });
        seq
    }

    /// Oldest retained entry with a sequence number above `seq`.
    pub fn next_after(&self, seq: u64) -> Option<LogEntry> {
        self.lock().entries.iter().find(|e| e.seq > seq).cloned()
    }

    /// Sequence number of the newest entry, 0 when nothing was logged.
    pub fn last_seq(&self) -> u64 {
        self.lock().next_seq - 1
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves the ring consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn truncate(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

/// `tracing_subscriber` layer writing events into a [`LogRing`].
#[derive(Debug, Clone)]
pub struct RingLayer {
    ring: Arc<LogRing>,
}

impl RingLayer {
    pub fn new(ring: Arc<LogRing>) -> Self {
        Self { ring }
    }
}

impl<S: Subscriber> Layer<S> for RingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut line = LineVisitor::default();
        event.record(&mut line);
        self.ring.push(*event.metadata().level(), &line.finish());
    }
}

/// Flattens an event into `message key=value ...`.
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl LineVisitor {
    fn finish(mut self) -> String {
        self.message.push_str(&self.fields);
        self.message
    }
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}
