//! Observability: metrics helpers and the Prometheus recorder.

pub mod metrics;
