//! Structured stage events emitted by the engine and the orchestrator

use std::sync::Mutex;
use std::time::Duration;
use tracing::info;

/// Progress record of one completed stage
#[derive(Debug, Clone, PartialEq)]
pub struct StageEvent {
    pub stage: String,
    pub counts: Vec<(&'static str, usize)>,
    pub duration: Duration,
}

impl StageEvent {
    pub fn new(stage: impl Into<String>, duration: Duration) -> Self {
        Self {
            stage: stage.into(),
            counts: Vec::new(),
            duration,
        }
    }

    pub fn with_count(mut self, name: &'static str, value: usize) -> Self {
        self.counts.push((name, value));
        self
    }

    pub fn count(&self, name: &str) -> Option<usize> {
        self.counts
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
    }
}

/// Receiver of stage events, decoupling computation from presentation
pub trait EventSink {
    fn record(&self, event: StageEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: StageEvent) {
        let counts = event
            .counts
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        info!(
            stage = %event.stage,
            duration_ms = event.duration.as_millis() as u64,
            "Stage complete - {}",
            counts
        );
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<StageEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StageEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn stages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.stage).collect()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: StageEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_records_in_order() {
        let sink = MemorySink::new();
        sink.record(StageEvent::new("join", Duration::from_millis(3)).with_count("points", 12));
        sink.record(StageEvent::new("kmeans", Duration::from_millis(9)).with_count("clusters", 2));

        assert_eq!(sink.stages(), vec!["join", "kmeans"]);
        let events = sink.events();
        assert_eq!(events[0].count("points"), Some(12));
        assert_eq!(events[1].count("points"), None);
    }
}
