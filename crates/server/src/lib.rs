//! HTTP surface of the seedbox tracker: sync bridge, job API, health and
//! metrics.

pub mod api;
pub mod metrics;
pub mod state;
