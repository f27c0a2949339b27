//! Permits for starting the download and update phases

use std::sync::Arc;

use async_trait::async_trait;

use crate::models::deployment::ProvisioningType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Download,
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermitRequest {
    pub action_id: String,
    pub phase: Phase,
}

/// Decides whether a phase may start. Denial is not an error.
#[async_trait]
pub trait AuthorizationProvider: Send + Sync {
    async fn authorize(&self, request: &PermitRequest) -> bool;
}

pub struct AlwaysGrant;

#[async_trait]
impl AuthorizationProvider for AlwaysGrant {
    async fn authorize(&self, _request: &PermitRequest) -> bool {
        true
    }
}

/// Permit sources for soft (attempt) and forced flows
#[derive(Clone)]
pub struct Authorizations {
    pub soft: Arc<dyn AuthorizationProvider>,
    pub forced: Arc<dyn AuthorizationProvider>,
}

impl Authorizations {
    pub fn new(soft: Arc<dyn AuthorizationProvider>, forced: Arc<dyn AuthorizationProvider>) -> Self {
        Self { soft, forced }
    }

    pub fn for_type(&self, provisioning: ProvisioningType) -> Arc<dyn AuthorizationProvider> {
        match provisioning {
            ProvisioningType::Forced => self.forced.clone(),
            ProvisioningType::Attempt | ProvisioningType::Skip => self.soft.clone(),
        }
    }
}

impl Default for Authorizations {
    fn default() -> Self {
        Self::new(Arc::new(AlwaysGrant), Arc::new(AlwaysGrant))
    }
}
