//! JSONL output layer.
//!
//! One object per event on stderr. Correlation fields (`run_id`, `adapter`,
//! `stage`) and the recovery subject (`target_id`, `action`) are lifted to
//! the top level so a log consumer can group lines per target without
//! digging into `fields`. Anything else lands under `fields`.

use std::io::{self, Write};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use super::events::Level;

/// Keys hoisted out of `fields`, in output order.
const LIFTED: [&str; 5] = ["run_id", "adapter", "stage", "target_id", "action"];

/// Lifted values seen on an event or inherited from its spans.
#[derive(Debug, Clone, Default)]
struct Lifted([Option<String>; LIFTED.len()]);

impl Lifted {
    fn slot(name: &str) -> Option<usize> {
        LIFTED.iter().position(|k| *k == name)
    }

    /// Inner spans and the event itself win; only gaps are filled.
    fn inherit(&mut self, outer: &Lifted) {
        for (mine, theirs) in self.0.iter_mut().zip(outer.0.iter()) {
            if mine.is_none() {
                mine.clone_from(theirs);
            }
        }
    }

    fn write_into(self, obj: &mut Map<String, Value>) {
        for (key, value) in LIFTED.iter().zip(self.0) {
            if let Some(value) = value {
                obj.insert((*key).to_string(), Value::String(value));
            }
        }
    }
}

#[derive(Default)]
struct Collector {
    lifted: Lifted,
    message: Option<String>,
    fields: Map<String, Value>,
}

impl Collector {
    fn put(&mut self, field: &Field, value: Value) {
        let name = field.name();
        if name == "message" {
            self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
            return;
        }
        match (Lifted::slot(name), value) {
            (Some(i), Value::String(s)) => self.lifted.0[i] = Some(s),
            (Some(i), other) => self.lifted.0[i] = Some(other.to_string()),
            (None, value) => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl Visit for Collector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.put(field, Value::String(format!("{:?}", value)));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        // NaN and infinities have no JSON form
        if let Some(n) = serde_json::Number::from_f64(value) {
            self.put(field, Value::Number(n));
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }
}

/// JSONL tracing layer, stderr by default.
pub struct JsonlLayer<W = io::Stderr> {
    writer: Mutex<W>,
}

impl JsonlLayer<io::Stderr> {
    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }
}

impl<W: Write> JsonlLayer<W> {
    pub fn new(writer: W) -> Self {
        JsonlLayer {
            writer: Mutex::new(writer),
        }
    }

    fn emit(&self, obj: Map<String, Value>) {
        let Ok(line) = serde_json::to_string(&obj) else {
            return;
        };
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", line);
        }
    }
}

impl<S, W> Layer<S> for JsonlLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: Write + 'static,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut collector = Collector::default();
        attrs.record(&mut collector);
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(collector.lifted);
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut collector = Collector::default();
        values.record(&mut collector);
        let mut ext = span.extensions_mut();
        match ext.get_mut::<Lifted>() {
            Some(existing) => {
                let mut updated = collector.lifted;
                updated.inherit(existing);
                *existing = updated;
            }
            None => ext.insert(collector.lifted),
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut collector = Collector::default();
        event.record(&mut collector);

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(outer) = span.extensions().get::<Lifted>() {
                    collector.lifted.inherit(outer);
                }
            }
        }

        let meta = event.metadata();
        let mut obj = Map::new();
        obj.insert(
            "ts".into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        obj.insert("level".into(), Value::from(Level::from(*meta.level()).as_str()));
        obj.insert("event".into(), Value::from(meta.target()));
        collector.lifted.write_into(&mut obj);
        if let Some(message) = collector.message {
            obj.insert("message".into(), Value::String(message));
        }
        if !collector.fields.is_empty() {
            obj.insert("fields".into(), Value::Object(collector.fields));
        }
        self.emit(obj);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn lines(f: impl FnOnce()) -> Vec<Value> {
        let sink = Sink::default();
        let subscriber = tracing_subscriber::registry().with(JsonlLayer::new(sink.clone()));
        tracing::subscriber::with_default(subscriber, f);
        let out = sink.0.lock().unwrap();
        String::from_utf8_lossy(&out)
            .lines()
            .map(|l| serde_json::from_str(l).expect("valid JSON line"))
            .collect()
    }

    #[test]
    fn dropped_request_line_shape() {
        let out = lines(|| {
            tracing::warn!(
                target: "erp.dropped",
                action = "reopen_unit",
                target_id = "port#1/unit#2",
                reason = "in_use",
                message = "request dropped"
            );
        });
        assert_eq!(out.len(), 1);
        let line = &out[0];
        assert_eq!(line["event"], "erp.dropped");
        assert_eq!(line["level"], "warn");
        assert_eq!(line["action"], "reopen_unit");
        assert_eq!(line["target_id"], "port#1/unit#2");
        assert_eq!(line["fields"]["reason"], "in_use");
        assert!(line["fields"].get("target_id").is_none());
        assert!(line["ts"].as_str().is_some_and(|ts| ts.ends_with('Z')));
    }

    #[test]
    fn numeric_and_bool_fields_keep_their_type() {
        let out = lines(|| {
            tracing::info!(
                target: "erp.finished",
                run_id = "run-1",
                stage = "followup",
                retries = 2u64,
                settled = false,
                message = "action finished"
            );
        });
        assert_eq!(out[0]["run_id"], "run-1");
        assert_eq!(out[0]["stage"], "followup");
        assert_eq!(out[0]["fields"]["retries"], 2);
        assert_eq!(out[0]["fields"]["settled"], false);
    }

    #[test]
    fn worker_span_supplies_correlation() {
        let out = lines(|| {
            let worker = tracing::info_span!("worker", run_id = "run-9", adapter = "a1");
            let _w = worker.enter();
            let action = tracing::info_span!("action", target_id = "port#3", adapter = "inner");
            let _a = action.enter();
            tracing::info!(target: "erp.submitted", message = "open port");
        });
        assert_eq!(out[0]["run_id"], "run-9");
        assert_eq!(out[0]["target_id"], "port#3");
        assert_eq!(out[0]["adapter"], "inner");
    }

    #[test]
    fn late_recorded_span_field_is_seen() {
        let out = lines(|| {
            let span = tracing::info_span!("action", target_id = tracing::field::Empty);
            let _g = span.enter();
            span.record("target_id", "adapter");
            tracing::debug!(target: "erp.completed", message = "done");
        });
        assert_eq!(out[0]["target_id"], "adapter");
        assert_eq!(out[0]["level"], "debug");
    }
}
