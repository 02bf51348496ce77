use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::schemas::Usage;

use super::{EventKind, TraceEvent};

/// When to keep the event list of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceMode {
    #[default]
    Off,
    On,
    /// Record everything, keep it only when the terminal step failed.
    OnError,
}

/// Per-run event collector. Cheap to clone; all clones feed the same list.
///
/// Nested runs get child collectors (same clock, fresh list) merged back
/// chronologically at completion.
#[derive(Clone)]
pub struct Tracer {
    inner: Arc<TracerInner>,
}

struct TracerInner {
    mode: TraceMode,
    epoch: Instant,
    events: Mutex<Vec<TraceEvent>>,
}

/// An open span. Emits `*.start` on creation, `*.stop` on `finish`.
pub struct Span {
    tracer: Tracer,
    stop_kind: EventKind,
    parent: Option<String>,
    id: String,
    started: Instant,
}

impl Tracer {
    pub fn new(mode: TraceMode) -> Self {
        Tracer {
            inner: Arc::new(TracerInner {
                mode,
                epoch: Instant::now(),
                events: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn disabled() -> Self {
        Self::new(TraceMode::Off)
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.mode != TraceMode::Off
    }

    pub fn mode(&self) -> TraceMode {
        self.inner.mode
    }

    /// A child collector on the same clock, for a nested run.
    pub fn child(&self) -> Tracer {
        Tracer {
            inner: Arc::new(TracerInner {
                mode: self.inner.mode,
                epoch: self.inner.epoch,
                events: Mutex::new(Vec::new()),
            }),
        }
    }

    fn record(&self, event: TraceEvent) {
        if self.is_enabled() {
            self.inner.events.lock().expect("trace lock").push(event);
        }
    }

    fn now_ns(&self) -> u128 {
        self.inner.epoch.elapsed().as_nanos()
    }

    /// Opens a span: records `<kind>.start` and returns the handle that
    /// records the matching stop event.
    pub fn span(
        &self,
        start_kind: EventKind,
        stop_kind: EventKind,
        parent: Option<&str>,
        meta: Value,
    ) -> Span {
        let id = Uuid::new_v4().to_string();
        self.record(TraceEvent {
            event: start_kind,
            timestamp_ns: self.now_ns(),
            duration_ms: None,
            span_id: id.clone(),
            parent_span_id: parent.map(str::to_string),
            meta,
        });
        Span {
            tracer: self.clone(),
            stop_kind,
            parent: parent.map(str::to_string),
            id,
            started: Instant::now(),
        }
    }

    /// Records a single instantaneous event.
    pub fn instant(&self, kind: EventKind, parent: Option<&str>, meta: Value) -> String {
        let id = Uuid::new_v4().to_string();
        self.record(TraceEvent {
            event: kind,
            timestamp_ns: self.now_ns(),
            duration_ms: None,
            span_id: id.clone(),
            parent_span_id: parent.map(str::to_string),
            meta,
        });
        id
    }

    /// Absorbs the events of a child collector, keeping timestamp order.
    pub fn merge_child(&self, child: &Tracer) {
        if !self.is_enabled() {
            return;
        }
        let child_events = child.inner.events.lock().expect("trace lock").clone();
        let mut events = self.inner.events.lock().expect("trace lock");
        events.extend(child_events);
        events.sort_by_key(|e| e.timestamp_ns);
    }

    /// The finalized event list, sorted by timestamp.
    pub fn finalize(&self) -> Vec<TraceEvent> {
        let mut events = self.inner.events.lock().expect("trace lock").clone();
        events.sort_by_key(|e| e.timestamp_ns);
        events
    }

    /// Drops everything; used by `on_error` mode when the run succeeded.
    pub fn discard(&self) {
        self.inner.events.lock().expect("trace lock").clear();
    }

    /// Writes the finalized event list as newline-delimited JSON, one event
    /// per line. Format version is implicit v1.
    pub fn write_ndjson(&self, out: &mut impl Write) -> std::io::Result<()> {
        for event in self.finalize() {
            let line = serde_json::to_string(&event).map_err(std::io::Error::other)?;
            writeln!(out, "{line}")?;
        }
        Ok(())
    }
}

impl Span {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn finish(self, meta: Value) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        self.tracer.record(TraceEvent {
            event: self.stop_kind,
            timestamp_ns: self.tracer.now_ns(),
            duration_ms: Some(duration_ms),
            span_id: self.id,
            parent_span_id: self.parent,
            meta,
        });
    }
}

/// Aggregate view over a parent and its completed children, for parallel
/// fan-outs.
#[derive(Debug, Clone, Serialize)]
pub struct MergedTrace {
    pub events: Vec<TraceEvent>,
    pub agent_count: usize,
    pub parallel: bool,
    pub wall_time_ms: u64,
    pub total_turns: u32,
}

/// Merges child traces into the parent's event list and computes aggregate
/// metadata.
pub fn merge_parallel(parent: &Tracer, children: &[(Tracer, Usage)]) -> MergedTrace {
    for (child, _) in children {
        parent.merge_child(child);
    }
    let events = parent.finalize();
    let wall_time_ms = events
        .iter()
        .filter_map(|e| e.duration_ms)
        .max()
        .unwrap_or(0);
    MergedTrace {
        events,
        agent_count: children.len(),
        parallel: children.len() > 1,
        wall_time_ms,
        total_turns: children.iter().map(|(_, usage)| usage.turns).sum(),
    }
}

/// Rolls up usage across steps (a parent and its nested children).
pub fn aggregate_usage<'a>(usages: impl IntoIterator<Item = &'a Usage>) -> Usage {
    let mut total = Usage::default();
    for usage in usages {
        total.duration_ms = total.duration_ms.max(usage.duration_ms);
        total.memory_bytes = total.memory_bytes.max(usage.memory_bytes);
        total.turns += usage.turns;
        total.input_tokens += usage.input_tokens;
        total.output_tokens += usage.output_tokens;
        total.total_tokens += usage.total_tokens;
        total.system_prompt_tokens += usage.system_prompt_tokens;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_pairs_share_id() {
        let tracer = Tracer::new(TraceMode::On);
        let span = tracer.span(
            EventKind::TurnStart,
            EventKind::TurnStop,
            None,
            Value::Null,
        );
        let id = span.id().to_string();
        span.finish(Value::Null);

        let events = tracer.finalize();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].span_id, id);
        assert_eq!(events[1].span_id, id);
        assert!(events[1].duration_ms.is_some());
    }

    #[test]
    fn test_disabled_records_nothing() {
        let tracer = Tracer::disabled();
        tracer.instant(EventKind::NestedCall, None, Value::Null);
        assert!(tracer.finalize().is_empty());
    }

    #[test]
    fn test_merge_child_keeps_order() {
        let parent = Tracer::new(TraceMode::On);
        let a = parent.span(EventKind::RunStart, EventKind::RunStop, None, Value::Null);
        let child = parent.child();
        child.instant(EventKind::NestedCall, Some(a.id()), Value::Null);
        a.finish(Value::Null);
        parent.merge_child(&child);

        let events = parent.finalize();
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].timestamp_ns <= w[1].timestamp_ns));
    }

    #[test]
    fn test_ndjson_one_line_per_event() {
        let tracer = Tracer::new(TraceMode::On);
        tracer.instant(EventKind::NestedCall, None, serde_json::json!({"agent": "x"}));
        let mut out = Vec::new();
        tracer.write_ndjson(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("nested.call"));
    }
}
