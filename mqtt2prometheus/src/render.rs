//! Rendering of the sample store in Prometheus text exposition format.

use std::fmt::Write;
use std::time::{Duration, Instant};

use crate::store::SharedStore;

/// Name of the exported gauge.
pub const METRIC_NAME: &str = "mqtt";

/// Broker identity attached to every exported line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerLabels {
    pub host: String,
    pub port: u16,
}

/// Renders the store as one gauge line per live topic.
pub struct Renderer {
    store: SharedStore,
    labels: BrokerLabels,
    window: Duration,
}

impl Renderer {
    /// Create a renderer over `store` using the given staleness window.
    pub fn new(store: SharedStore, labels: BrokerLabels, window: Duration) -> Self {
        Self {
            store,
            labels,
            window,
        }
    }

    /// Evict stale topics and render the remaining ones.
    ///
    /// The body always ends with exactly one newline, so an empty store
    /// renders as `"\n"`.
    pub fn render(&self, now: Instant) -> String {
        let snapshot = self.store.snapshot_and_evict(now, self.window);
        let host = escape_label_value(&self.labels.host);
        let mut output = String::with_capacity(snapshot.len() * 80 + 1);

        for (i, (topic, value)) in snapshot.iter().enumerate() {
            if i > 0 {
                output.push('\n');
            }
            write!(
                output,
                "{}{{host=\"{}\",port=\"{}\",topic=\"{}\"}} {}",
                METRIC_NAME,
                host,
                self.labels.port,
                escape_label_value(topic),
                value
            )
            .ok();
        }
        output.push('\n');

        output
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}
