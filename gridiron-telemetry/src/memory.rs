use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;
use tracing::Subscriber;
use tracing_subscriber::{Layer, layer::Context, registry::LookupSpan};

/// A captured log event.
#[derive(Debug, Clone, Serialize)]
pub struct EventData {
    pub level: String,
    pub target: String,
    /// The event's `message` field, empty when the event had none.
    pub message: String,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: u128,
    /// All other fields, including those of enclosing spans.
    pub fields: HashMap<String, serde_json::Value>,
}

impl EventData {
    /// Read a field as a string, whether it was recorded as a string or via `%`/`?`.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|v| v.as_str())
    }
}

/// Shared storage for captured events.
#[derive(Debug, Clone, Default)]
pub struct SharedEventStorage {
    events: Arc<RwLock<Vec<EventData>>>,
}

impl SharedEventStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// All captured events in emission order.
    pub fn events(&self) -> Vec<EventData> {
        self.events.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Captured events whose message equals `message`.
    pub fn with_message(&self, message: &str) -> Vec<EventData> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.message == message)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Serialise every captured event as a JSON array.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&*self.events.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn push(&self, event: EventData) {
        self.events.write().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

/// A tracing layer that captures events in memory
pub struct InMemoryEventLayer {
    storage: Arc<SharedEventStorage>,
}

impl InMemoryEventLayer {
    pub fn new(storage: Arc<SharedEventStorage>) -> Self {
        Self { storage }
    }
}

#[derive(Clone)]
struct SpanFields(HashMap<String, serde_json::Value>);

impl<S> Layer<S> for InMemoryEventLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        id: &tracing::Id,
        ctx: Context<'_, S>,
    ) {
        let Some(span) = ctx.span(id) else { return };
        let mut visitor = JsonVisitor::default();
        attrs.record(&mut visitor);
        span.extensions_mut().insert(SpanFields(visitor.0));
    }

    fn on_record(&self, id: &tracing::Id, values: &tracing::span::Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else { return };
        let mut extensions = span.extensions_mut();
        if let Some(fields) = extensions.get_mut::<SpanFields>() {
            let mut visitor = JsonVisitor::default();
            values.record(&mut visitor);
            fields.0.extend(visitor.0);
        }
    }

    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let mut fields = HashMap::new();

        // Outermost span first so inner spans and the event override
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(span_fields) = span.extensions().get::<SpanFields>() {
                    fields.extend(span_fields.0.clone());
                }
            }
        }

        let mut visitor = JsonVisitor::default();
        event.record(&mut visitor);
        fields.extend(visitor.0);

        let message = match fields.remove("message") {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let metadata = event.metadata();
        self.storage.push(EventData {
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message,
            timestamp: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos(),
            fields,
        });
    }
}

#[derive(Default)]
struct JsonVisitor(HashMap<String, serde_json::Value>);

impl tracing::field::Visit for JsonVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.insert(field.name().to_string(), serde_json::Value::Bool(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.0.insert(field.name().to_string(), serde_json::json!(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn capture(f: impl FnOnce()) -> Arc<SharedEventStorage> {
        let storage = Arc::new(SharedEventStorage::new());
        let subscriber =
            tracing_subscriber::registry().with(InMemoryEventLayer::new(storage.clone()));
        tracing::subscriber::with_default(subscriber, f);
        storage
    }

    #[test]
    fn captures_message_level_and_fields() {
        let storage = capture(|| {
            tracing::warn!(segments = 3u64, score = 0.5, source = "https://a", "context trimmed");
        });
        let events = storage.with_message("context trimmed");
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.level, "WARN");
        assert_eq!(event.fields["segments"], serde_json::json!(3));
        assert_eq!(event.fields["score"], serde_json::json!(0.5));
        assert_eq!(event.field_str("source"), Some("https://a"));
        assert!(!event.fields.contains_key("message"));
    }

    #[test]
    fn display_fields_are_strings() {
        let storage = capture(|| {
            let stage = "generating";
            tracing::debug!(to = %stage, "stage transition");
        });
        assert_eq!(storage.events()[0].field_str("to"), Some("generating"));
    }

    #[test]
    fn events_inherit_span_fields() {
        let storage = capture(|| {
            let span = tracing::info_span!("recommend", request = "r-1", stage = "outer");
            let _guard = span.enter();
            tracing::info!(stage = "inner", "inside");
        });
        let event = &storage.events()[0];
        assert_eq!(event.field_str("request"), Some("r-1"));
        assert_eq!(event.field_str("stage"), Some("inner"));
    }

    #[test]
    fn clear_and_json_export() {
        let storage = capture(|| tracing::info!("one"));
        assert_eq!(storage.len(), 1);
        let json = storage.to_json().unwrap();
        assert!(json.contains("\"message\":\"one\""));
        storage.clear();
        assert!(storage.is_empty());
    }
}
