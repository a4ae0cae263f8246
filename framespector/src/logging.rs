use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{self, Debug, Write as _};
use std::io::{self, Write as _};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::event::Event;
use tracing::field::{Field, Visit};
use tracing::{span, Id, Level, Metadata, Subscriber};

thread_local! {
    static CURRENT_SPANS: RefCell<Vec<u64>> = RefCell::new(Vec::new());
}

/// Writes one line per event, to stderr unless another writer is given:
/// `LEVEL target: span{fields}: message key=value ...`
pub struct StderrSubscriber {
    max_level: Level,
    ids: AtomicUsize,
    spans: Mutex<HashMap<u64, SpanLine>>,
    writer: Mutex<Box<dyn io::Write + Send>>,
}

struct SpanLine {
    name: &'static str,
    fields: String,
    refs: usize,
}

impl StderrSubscriber {
    pub fn new(max_level: Level) -> Self {
        StderrSubscriber::with_writer(max_level, Box::new(io::stderr()))
    }

    pub fn with_writer(max_level: Level, writer: Box<dyn io::Write + Send>) -> Self {
        StderrSubscriber {
            max_level,
            ids: AtomicUsize::new(1),
            spans: Mutex::new(HashMap::new()),
            writer: Mutex::new(writer),
        }
    }

    /// Installs the subscriber for the whole process. Fails if one is already set.
    pub fn install(max_level: Level) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
        tracing::subscriber::set_global_default(StderrSubscriber::new(max_level))
    }

    fn span_context(&self) -> String {
        let spans = match self.spans.lock() {
            Ok(spans) => spans,
            Err(poisoned) => poisoned.into_inner(),
        };
        CURRENT_SPANS.with(|stack| {
            let mut context = String::new();
            for id in stack.borrow().iter() {
                match spans.get(id) {
                    Some(span) if span.fields.is_empty() => {
                        let _ = write!(context, "{}: ", span.name);
                    }
                    Some(span) => {
                        let _ = write!(context, "{}{{{}}}: ", span.name, span.fields.trim_start());
                    }
                    None => {}
                }
            }
            context
        })
    }

    fn render(&self, metadata: &Metadata, visitor: &LineVisitor) -> String {
        format!(
            "{:>5} {}: {}{}{}\n",
            metadata.level(),
            metadata.target(),
            self.span_context(),
            visitor.message,
            visitor.fields
        )
    }
}

// https://docs.rs/tracing/0.1.7/tracing/subscriber/trait.Subscriber.html
impl Subscriber for StderrSubscriber {
    fn enabled(&self, metadata: &Metadata) -> bool {
        *metadata.level() <= self.max_level
    }

    fn new_span(&self, span: &span::Attributes) -> Id {
        let mut visitor = LineVisitor::default();
        span.record(&mut visitor);
        let line = SpanLine {
            name: span.metadata().name(),
            fields: visitor.fields,
            refs: 1,
        };

        // Return an incrementing ID with every new span
        let id = self.ids.fetch_add(1, Ordering::SeqCst) as u64;
        if let Ok(mut spans) = self.spans.lock() {
            spans.insert(id, line);
        }
        Id::from_u64(id)
    }

    fn record(&self, span: &Id, values: &span::Record) {
        let mut visitor = LineVisitor::default();
        values.record(&mut visitor);
        if let Ok(mut spans) = self.spans.lock() {
            if let Some(line) = spans.get_mut(&span.into_u64()) {
                line.fields.push_str(&visitor.fields);
            }
        }
    }

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        let line = self.render(event.metadata(), &visitor);
        // Nowhere left to report a failed write.
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.write_all(line.as_bytes());
        }
    }

    fn enter(&self, span: &Id) {
        CURRENT_SPANS.with(|stack| stack.borrow_mut().push(span.into_u64()));
    }

    fn exit(&self, span: &Id) {
        CURRENT_SPANS.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(pos) = stack.iter().rposition(|id| *id == span.into_u64()) {
                stack.remove(pos);
            }
        });
    }

    fn clone_span(&self, span: &Id) -> Id {
        if let Ok(mut spans) = self.spans.lock() {
            if let Some(line) = spans.get_mut(&span.into_u64()) {
                line.refs += 1;
            }
        }
        span.clone()
    }

    // The span is forgotten once its last handle is dropped
    fn try_close(&self, span: Id) -> bool {
        let mut spans = match self.spans.lock() {
            Ok(spans) => spans,
            Err(_) => return false,
        };
        let id = span.into_u64();
        let closed = match spans.get_mut(&id) {
            Some(line) => {
                line.refs = line.refs.saturating_sub(1);
                line.refs == 0
            }
            None => false,
        };
        if closed {
            spans.remove(&id);
        }
        closed
    }
}

/// Collects the `message` field and renders the others as ` key=value`.
#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl fmt::Debug for StderrSubscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StderrSubscriber")
            .field("max_level", &self.max_level)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tracing::{debug, info, span};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn lines(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn span_line(name: &'static str, fields: &str) -> SpanLine {
        SpanLine {
            name,
            fields: fields.to_string(),
            refs: 1,
        }
    }

    #[test]
    fn events_below_max_level_are_skipped() {
        let captured = Captured::default();
        let subscriber = StderrSubscriber::with_writer(Level::INFO, Box::new(captured.clone()));
        tracing::subscriber::with_default(subscriber, || {
            assert!(span!(Level::DEBUG, "hidden_span").is_disabled());
            assert!(!span!(Level::INFO, "visible_span").is_disabled());
            info!(frames = 1, "visible");
            debug!("hidden");
        });

        let lines = captured.lines();
        assert_eq!(lines.lines().count(), 1);
        assert!(lines.contains("visible frames=1"));
        assert!(!lines.contains("hidden"));
    }

    #[test]
    fn line_carries_level_target_span_and_fields() {
        let captured = Captured::default();
        let subscriber = StderrSubscriber::with_writer(Level::TRACE, Box::new(captured.clone()));
        tracing::subscriber::with_default(subscriber, || {
            let span = span!(Level::INFO, "receive_loop", iface = "veth0-peer");
            let _entered = span.enter();
            info!(received = 3, "stopped");
        });

        assert_eq!(
            captured.lines(),
            " INFO framespector::logging::tests: receive_loop{iface=veth0-peer}: stopped received=3\n"
        );
    }

    #[test]
    fn span_ids_are_distinct() {
        let subscriber = StderrSubscriber::with_writer(Level::TRACE, Box::new(io::sink()));
        tracing::subscriber::with_default(subscriber, || {
            let a = span!(Level::INFO, "a", n = 1);
            let b = span!(Level::INFO, "b");
            assert_ne!(a.id(), b.id());
            a.in_scope(|| info!("inside a"));
        });
    }

    #[test]
    fn span_context_follows_enter_and_exit() {
        let subscriber = StderrSubscriber::with_writer(Level::TRACE, Box::new(io::sink()));
        let id = Id::from_u64(7);
        subscriber
            .spans
            .lock()
            .unwrap()
            .insert(7, span_line("receive_loop", " iface=veth0-peer"));
        subscriber.enter(&id);
        assert_eq!(subscriber.span_context(), "receive_loop{iface=veth0-peer}: ");
        subscriber.exit(&id);
        assert_eq!(subscriber.span_context(), "");
    }

    #[test]
    fn closed_spans_are_forgotten() {
        let subscriber = StderrSubscriber::with_writer(Level::TRACE, Box::new(io::sink()));
        let id = Id::from_u64(3);
        subscriber
            .spans
            .lock()
            .unwrap()
            .insert(3, span_line("receive_loop", ""));

        let clone = subscriber.clone_span(&id);
        assert!(!subscriber.try_close(clone));
        assert!(subscriber.spans.lock().unwrap().contains_key(&3));

        assert!(subscriber.try_close(id.clone()));
        assert!(subscriber.spans.lock().unwrap().is_empty());
        assert!(!subscriber.try_close(id));
    }
}
