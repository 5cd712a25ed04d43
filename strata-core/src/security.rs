//! Caller identity used to scope every repository access to one organization.

/// Supplies the organization of the current caller
pub trait SecurityContext: Send + Sync {
    fn organization_id(&self) -> String;
}

/// Fixed organization, for single-tenant deployments, the CLI and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticSecurityContext {
    organization_id: String,
}

impl StaticSecurityContext {
    pub fn new<S: Into<String>>(organization_id: S) -> Self {
        Self {
            organization_id: organization_id.into(),
        }
    }
}

impl Default for StaticSecurityContext {
    fn default() -> Self {
        Self::new("default-org")
    }
}

impl SecurityContext for StaticSecurityContext {
    fn organization_id(&self) -> String {
        self.organization_id.clone()
    }
}
