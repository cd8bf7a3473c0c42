//! Venue adapter framework.
//!
//! ## Adding a New Venue
//!
//! 1. Create a module under `venue/<name>/`
//! 2. Implement [`VenueAdapter`] for the venue, converting every wire type
//!    into the canonical model
//! 3. Register a builder with [`AdapterRegistry`] at startup; enabled venues
//!    without a registered builder fail boot with a configuration error

pub mod hyperliquid;
mod reconnect;
mod registry;
mod traits;

pub use reconnect::ReconnectPolicy;
pub use registry::{AdapterBuilder, AdapterRegistry, VenueConfig};
pub use traits::VenueAdapter;
