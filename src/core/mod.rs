//! Core gateway components: canonical model, event bus, venue adapter
//! framework, and the cross-venue aggregators.

pub mod bus;
pub mod domain;
pub mod market;
pub mod portfolio;
pub mod venue;
