//! perp-gateway - Unified trading gateway for perpetual-futures venues.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── core/              # Reusable gateway components
//! │   ├── domain/        # Canonical data model
//! │   ├── bus/           # In-process event bus
//! │   ├── venue/         # Adapter framework + venue implementations
//! │   ├── portfolio/     # Cross-venue portfolio aggregation
//! │   └── market/        # Best bid/ask aggregation
//! ├── app/               # Orchestration, configuration, client hub
//! └── api/               # REST + client WebSocket surface
//! ```

pub mod api;
pub mod app;
pub mod core;
pub mod error;
