//! Customer liveness leases
//!
//! A lease is a pair of TTL keys: `lease:{ticket}` holding the customer id and
//! the reverse index `customer-lease:{customer}` holding the ticket. Both are
//! written, renewed and deleted together. A customer is alive while both exist.

use crate::error::{MatchmakingError, Result};
use crate::store::{keys, Store};
use crate::types::{CustomerId, LeaseTicket};
use crate::utils::generate_lease_ticket;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// TTL-backed liveness tickets for waiting customers
pub struct LeaseRegistry {
    store: Arc<dyn Store>,
    ttl: Duration,
}

impl LeaseRegistry {
    pub fn new(store: Arc<dyn Store>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh lease, invalidating any prior one for the same customer
    pub async fn create(&self, customer_id: &str) -> Result<LeaseTicket> {
        if customer_id.trim().is_empty() {
            return Err(MatchmakingError::InvalidRequest {
                reason: "Customer ID cannot be empty".to_string(),
            }
            .into());
        }

        self.delete_by_customer(customer_id).await?;

        let ticket = generate_lease_ticket();
        self.store
            .set_ex(&keys::lease(&ticket), customer_id, self.ttl)
            .await?;
        self.store
            .set_ex(&keys::customer_lease(customer_id), &ticket, self.ttl)
            .await?;

        debug!("Created lease for customer '{}'", customer_id);
        Ok(ticket)
    }

    /// Push the expiry of a live lease out by a full TTL
    pub async fn renew(&self, ticket: &str) -> Result<bool> {
        let customer_id = match self.validate(ticket).await? {
            Some(customer_id) => customer_id,
            None => return Ok(false),
        };

        if !self.store.expire(&keys::lease(ticket), self.ttl).await? {
            return Ok(false);
        }
        let reverse = keys::customer_lease(&customer_id);
        if !self.store.expire(&reverse, self.ttl).await? {
            self.store.set_ex(&reverse, ticket, self.ttl).await?;
        }
        Ok(true)
    }

    /// Customer owning a live ticket
    pub async fn validate(&self, ticket: &str) -> Result<Option<CustomerId>> {
        if ticket.trim().is_empty() {
            return Ok(None);
        }
        self.store.get(&keys::lease(ticket)).await
    }

    pub async fn is_alive(&self, customer_id: &str) -> Result<bool> {
        match self.store.get(&keys::customer_lease(customer_id)).await? {
            Some(ticket) => self.store.exists(&keys::lease(&ticket)).await,
            None => Ok(false),
        }
    }

    /// Delete a lease by ticket
    pub async fn delete(&self, ticket: &str) -> Result<bool> {
        if ticket.trim().is_empty() {
            return Ok(false);
        }
        let customer_id = self.store.get(&keys::lease(ticket)).await?;
        let removed = self.store.del(&keys::lease(ticket)).await?;

        if let Some(customer_id) = customer_id {
            let reverse = keys::customer_lease(&customer_id);
            // Only drop the reverse index if it still points at this ticket
            if self.store.get(&reverse).await?.as_deref() == Some(ticket) {
                self.store.del(&reverse).await?;
            }
        }
        Ok(removed)
    }

    /// Delete whatever lease the customer currently holds
    pub async fn delete_by_customer(&self, customer_id: &str) -> Result<bool> {
        let reverse = keys::customer_lease(customer_id);
        match self.store.get(&reverse).await? {
            Some(ticket) => {
                self.store.del(&keys::lease(&ticket)).await?;
                self.store.del(&reverse).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Whole seconds left on a ticket, rounded up; -1 if the ticket is absent
    pub async fn remaining_ttl(&self, ticket: &str) -> Result<i64> {
        if ticket.trim().is_empty() {
            return Ok(-1);
        }
        Ok(match self.store.ttl(&keys::lease(ticket)).await? {
            Some(left) => ((left.as_millis() + 999) / 1000) as i64,
            None => -1,
        })
    }
}
