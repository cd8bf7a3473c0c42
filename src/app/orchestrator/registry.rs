//! The managed venue set and its snapshot seam.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::domain::{Balance, ConnectionStatus, Position, Venue, VenueStatus};
use crate::core::portfolio::VenueSnapshots;
use crate::error::{Error, Result};

use super::manager::VenueManager;

/// Venue managers keyed by venue. Built once at startup; shared read-only.
pub struct VenueRegistry {
    managers: HashMap<Venue, Arc<VenueManager>>,
}

impl VenueRegistry {
    #[must_use]
    pub fn new(managers: HashMap<Venue, Arc<VenueManager>>) -> Self {
        Self { managers }
    }

    /// Manager for `venue`, regardless of health.
    pub fn get(&self, venue: Venue) -> Result<Arc<VenueManager>> {
        self.managers
            .get(&venue)
            .cloned()
            .ok_or(Error::VenueConnection {
                venue,
                message: "venue not enabled".into(),
            })
    }

    /// Manager for `venue`, required connected. The circuit breaker is
    /// consulted by [`VenueManager::guard`] so an open breaker surfaces as
    /// its own error and the half-open trial can be admitted.
    pub fn get_healthy(&self, venue: Venue) -> Result<Arc<VenueManager>> {
        let manager = self.get(venue)?;
        if manager.status().connection_status != ConnectionStatus::Connected {
            return Err(Error::VenueConnection {
                venue,
                message: "venue is not connected".into(),
            });
        }
        Ok(manager)
    }

    #[must_use]
    pub fn contains(&self, venue: Venue) -> bool {
        self.managers.contains_key(&venue)
    }

    /// All managers in venue-ordinal order.
    #[must_use]
    pub fn managers(&self) -> Vec<Arc<VenueManager>> {
        let mut managers: Vec<_> = self.managers.values().cloned().collect();
        managers.sort_by_key(|m| m.venue());
        managers
    }

    #[must_use]
    pub fn statuses(&self) -> HashMap<Venue, VenueStatus> {
        self.managers
            .iter()
            .map(|(venue, manager)| (*venue, manager.status()))
            .collect()
    }

    #[must_use]
    pub fn healthy_count(&self) -> usize {
        self.managers.values().filter(|m| m.is_healthy()).count()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.managers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

#[async_trait]
impl VenueSnapshots for VenueRegistry {
    fn venues(&self) -> Vec<Venue> {
        let mut venues: Vec<Venue> = self.managers.keys().copied().collect();
        venues.sort();
        venues
    }

    fn is_healthy(&self, venue: Venue) -> bool {
        self.managers
            .get(&venue)
            .map(|manager| manager.is_healthy())
            .unwrap_or(false)
    }

    async fn positions(&self, venue: Venue) -> Result<Vec<Position>> {
        let manager = self.get(venue)?;
        let adapter = manager.adapter();
        manager.guard(adapter.get_positions()).await
    }

    async fn balances(&self, venue: Venue) -> Result<Vec<Balance>> {
        let manager = self.get(venue)?;
        let adapter = manager.adapter();
        manager.guard(adapter.get_balances()).await
    }
}
