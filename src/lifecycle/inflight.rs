use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use prometheus::IntGauge;
use uuid::Uuid;

use crate::error::AppError;

/// Per-entity operation slots. Same-key operations are rejected while one
/// is running; different keys never wait on each other.
pub struct InFlight {
    slots: DashMap<String, Uuid>,
    gauge: IntGauge,
}

/// Releases its slot on drop, including when the operation errors or its
/// future is cancelled.
#[must_use]
pub struct InFlightGuard<'a> {
    owner: &'a InFlight,
    key: String,
    token: Uuid,
}

impl InFlight {
    pub fn new(gauge: IntGauge) -> Self {
        Self {
            slots: DashMap::new(),
            gauge,
        }
    }

    pub fn acquire(&self, key: String) -> Result<InFlightGuard<'_>, AppError> {
        match self.slots.entry(key.clone()) {
            Entry::Occupied(_) => Err(AppError::Busy(key)),
            Entry::Vacant(slot) => {
                let token = Uuid::new_v4();
                slot.insert(token);
                self.gauge.inc();
                Ok(InFlightGuard {
                    owner: self,
                    key,
                    token,
                })
            }
        }
    }

    pub fn request(&self, request_id: &str) -> Result<InFlightGuard<'_>, AppError> {
        self.acquire(format!("request:{request_id}"))
    }

    pub fn delivery(&self, delivery_id: &str) -> Result<InFlightGuard<'_>, AppError> {
        self.acquire(format!("delivery:{delivery_id}"))
    }

    pub fn is_busy(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self
            .owner
            .slots
            .remove_if(&self.key, |_, token| *token == self.token)
            .is_some()
        {
            self.owner.gauge.dec();
        }
    }
}
