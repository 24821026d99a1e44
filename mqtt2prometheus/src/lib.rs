//! Prometheus exporter for MQTT topics.
//!
//! This crate subscribes to every topic on an MQTT broker, interprets each
//! payload as a scalar, and exposes the latest value per topic via an HTTP
//! `/metrics` endpoint. Topics that stop publishing are dropped after a
//! configurable staleness window.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   MQTT Broker   │────>│ IngestWorker    │────>│   SampleStore   │<────│   HTTP Server   │
//! │      (#)        │     │ (normalize)     │     │ (last value)    │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! # Payloads
//!
//! Boolean-like tokens (`true`, `open`, `low`, ...) become `1` or `0`, plain
//! numbers are exported as-is, and everything else (JSON, binary, free text,
//! retained replays) is skipped. See [`normalize::classify`].
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`]. `MQTT_HOST`, `MQTT_PORT` and `TIMEOUT` are
//! read from the environment by the binary.

pub mod config;
pub mod http;
pub mod normalize;
pub mod render;
pub mod store;
pub mod subscriber;
pub mod worker;

pub use config::ExporterConfig;
pub use http::HttpServer;
pub use normalize::{Ignored, Reading, classify};
pub use render::{BrokerLabels, Renderer};
pub use store::{Sample, SampleStore, SharedStore};
pub use subscriber::MqttSubscriber;
pub use worker::{BrokerMessage, IngestWorker, message_channel};
