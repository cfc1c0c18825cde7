use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub duration_minutes: u32,
    /// Minor currency units.
    pub base_price: u64,
}

/// Read access to the service/package catalogue owned by the CRUD layer.
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn get_service(&self, service_id: Ulid) -> Option<ServiceInfo>;
}

#[derive(Default)]
pub struct InMemoryCatalog {
    services: DashMap<Ulid, ServiceInfo>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, service: ServiceInfo) {
        self.services.insert(service.id, service);
    }

    /// Change a service's duration; existing bookings keep their own.
    pub fn set_duration(&self, service_id: Ulid, minutes: u32) {
        if let Some(mut svc) = self.services.get_mut(&service_id) {
            svc.duration_minutes = minutes;
        }
    }

    pub fn remove(&self, service_id: &Ulid) {
        self.services.remove(service_id);
    }
}

#[async_trait]
impl ServiceCatalog for InMemoryCatalog {
    async fn get_service(&self, service_id: Ulid) -> Option<ServiceInfo> {
        self.services.get(&service_id).map(|s| s.value().clone())
    }
}
