//! In-memory object store
//!
//! Backing storage for the REST surface: one typed collection per model,
//! addressed by the model's own key. Persistence lives behind this seam; the
//! control plane itself only ever sees these collections.

use crucible_models::{BootEnv, Job, Keyed, Lease, Machine, Reservation, Subnet};
use dashmap::DashMap;

/// One keyed collection of objects.
pub struct Collection<T> {
    items: DashMap<String, T>,
}

impl<T: Keyed + Clone> Collection<T> {
    fn new() -> Self {
        Self {
            items: DashMap::new(),
        }
    }

    pub fn list(&self) -> Vec<T> {
        self.items.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn get(&self, key: &str) -> Option<T> {
        self.items.get(key).map(|entry| entry.value().clone())
    }

    /// Insert or replace; returns the previous object if any.
    pub fn insert(&self, item: T) -> Option<T> {
        self.items.insert(item.key(), item)
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        self.items.remove(key).map(|(_, item)| item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The full object store.
pub struct Store {
    pub machines: Collection<Machine>,
    pub bootenvs: Collection<BootEnv>,
    pub subnets: Collection<Subnet>,
    pub leases: Collection<Lease>,
    pub reservations: Collection<Reservation>,
    pub jobs: Collection<Job>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            machines: Collection::new(),
            bootenvs: Collection::new(),
            subnets: Collection::new(),
            leases: Collection::new(),
            reservations: Collection::new(),
            jobs: Collection::new(),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
