// Tenant lookup
//
// Consulted from inside the WebSocket handshake callback, which is
// synchronous, so the trait is too.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            created_at: Utc::now(),
        }
    }
}

/// Resolves the tenant segment of a connection path
pub trait TenantLookup: Send + Sync {
    fn find_by_name(&self, name: &str) -> Option<Tenant>;
}

/// Tenant table held in memory, seeded from configuration
#[derive(Debug, Default)]
pub struct InMemoryTenants {
    by_name: DashMap<String, Tenant>,
}

impl InMemoryTenants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tenants = Self::new();
        for name in names {
            tenants.insert(Tenant::new(name));
        }
        tenants
    }

    /// Add or replace a tenant, returning the previous entry with that name
    pub fn insert(&self, tenant: Tenant) -> Option<Tenant> {
        self.by_name.insert(tenant.name.clone(), tenant)
    }

    pub fn remove(&self, name: &str) -> Option<Tenant> {
        self.by_name.remove(name).map(|(_, tenant)| tenant)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl TenantLookup for InMemoryTenants {
    fn find_by_name(&self, name: &str) -> Option<Tenant> {
        self.by_name.get(name).map(|entry| entry.value().clone())
    }
}
