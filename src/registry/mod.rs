// Connection registry
//
// The one structure shared by every connection task. Entries are keyed by
// (tenant, device) and replaced atomically on register; unregister only
// removes the entry when it still points at the caller.

pub mod tenants;

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::common::types::{DeviceKey, Identity};
use crate::server::ConnectionHandle;

pub use tenants::{InMemoryTenants, Tenant, TenantLookup};

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<DeviceKey, Arc<ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle` under its identity. A previous connection for the
    /// same device is returned and is no longer reachable through lookups;
    /// closing it is the caller's job.
    pub fn register(&self, handle: Arc<ConnectionHandle>) -> Option<Arc<ConnectionHandle>> {
        let key = handle.identity().key();
        let displaced = self.connections.insert(key, Arc::clone(&handle));
        match &displaced {
            Some(old) => info!(
                device = %handle.identity(),
                old = %old.id(),
                new = %handle.id(),
                "connection replaced"
            ),
            None => info!(device = %handle.identity(), connection = %handle.id(), "connection registered"),
        }
        displaced
    }

    /// Remove `handle` if it is still the registered connection for its device
    pub fn unregister(&self, handle: &ConnectionHandle) -> bool {
        let key = handle.identity().key();
        let removed = self
            .connections
            .remove_if(&key, |_, current| current.id() == handle.id())
            .is_some();
        if removed {
            info!(device = %handle.identity(), connection = %handle.id(), "connection unregistered");
        } else {
            debug!(device = %handle.identity(), connection = %handle.id(), "stale unregister ignored");
        }
        removed
    }

    pub fn lookup(&self, tenant_id: Option<&str>, device_id: &str) -> Option<Arc<ConnectionHandle>> {
        self.connections
            .get(&DeviceKey::new(tenant_id, device_id))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn lookup_identity(&self, identity: &Identity) -> Option<Arc<ConnectionHandle>> {
        self.connections
            .get(&identity.key())
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Snapshot of the registered identities
    pub fn identities(&self) -> Vec<Identity> {
        self.connections
            .iter()
            .map(|entry| entry.value().identity().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::ProtocolVersion;
    use crate::protocol::MessageCodec;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn handle(tenant: Option<&str>, device: &str) -> Arc<ConnectionHandle> {
        let (tx, _rx) = mpsc::unbounded_channel();
        let identity = Identity::new(tenant.map(String::from), device, ProtocolVersion::V16);
        Arc::new(ConnectionHandle::new(identity, tx, MessageCodec::default(), Duration::from_secs(60)))
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = ConnectionRegistry::new();
        let cs001 = handle(Some("tenantA"), "CS001");

        assert!(registry.register(Arc::clone(&cs001)).is_none());
        let found = registry.lookup(Some("tenantA"), "CS001").unwrap();
        assert_eq!(found.id(), cs001.id());

        assert!(registry.lookup(Some("tenantB"), "CS001").is_none());
        assert!(registry.lookup(None, "CS001").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_replacement_returns_displaced() {
        let registry = ConnectionRegistry::new();
        let first = handle(Some("tenantA"), "CS001");
        let second = handle(Some("tenantA"), "CS001");

        registry.register(Arc::clone(&first));
        let displaced = registry.register(Arc::clone(&second)).unwrap();
        assert_eq!(displaced.id(), first.id());
        assert_eq!(registry.lookup_identity(second.identity()).unwrap().id(), second.id());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_late_unregister_keeps_newer_connection() {
        let registry = ConnectionRegistry::new();
        let first = handle(None, "CS002");
        let second = handle(None, "CS002");

        registry.register(Arc::clone(&first));
        registry.register(Arc::clone(&second));

        assert!(!registry.unregister(&first));
        assert_eq!(registry.lookup(None, "CS002").unwrap().id(), second.id());

        assert!(registry.unregister(&second));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_registration() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();
        for n in 0..32 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let h = handle(Some("tenantA"), &format!("CS{:03}", n));
                registry.register(Arc::clone(&h));
                if n % 2 == 0 {
                    registry.unregister(&h);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(registry.len(), 16);
        assert_eq!(registry.identities().len(), 16);
    }
}
