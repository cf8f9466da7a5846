//! Per-request caller identity and tenant scoping.

use std::fmt;

use crate::error::{ApiError, Result};

/// Identity of the caller, established by the external auth layer and
/// passed explicitly to every component entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Calling user.
    pub user_id: String,
    /// Project (tenant) the caller is scoped to.
    pub project_id: String,
    /// Whether the caller holds the admin role.
    pub is_admin: bool,
}

impl RequestContext {
    /// Create a context for a regular project member.
    pub fn new(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            project_id: project_id.into(),
            is_admin: false,
        }
    }

    /// Create an admin context.
    pub fn admin(user_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            is_admin: true,
            ..Self::new(user_id, project_id)
        }
    }

    /// Check that the caller may address resources of `project_id`.
    pub fn authorize_project(&self, project_id: &str) -> Result<()> {
        if self.is_admin || self.project_id == project_id {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "project {} may not access project {}",
                self.project_id, project_id
            )))
        }
    }

    /// Whether a resource owned by `project_id` is visible to the caller.
    pub fn can_see(&self, project_id: &str) -> bool {
        self.is_admin || self.project_id == project_id
    }

    /// Resolve the scope of a listing or summary request.
    ///
    /// `all_tenants` is only honored for admins. Non-admins fall back to
    /// their own project, or get `Forbidden` when `strict` is set.
    pub fn resolve_scope(&self, all_tenants: bool, strict: bool) -> Result<TenantScope> {
        match (all_tenants, self.is_admin) {
            (true, true) => Ok(TenantScope::AllTenants),
            (true, false) if strict => Err(ApiError::Forbidden(
                "all_tenants requires the admin role".to_string(),
            )),
            (true, false) => {
                tracing::debug!(project_id = %self.project_id, "ignoring all_tenants for non-admin caller");
                Ok(TenantScope::Project(self.project_id.clone()))
            }
            (false, _) => Ok(TenantScope::Project(self.project_id.clone())),
        }
    }
}

/// Which projects a listing or summary spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantScope {
    /// Only resources owned by this project.
    Project(String),
    /// Every project (admin only).
    AllTenants,
}

impl TenantScope {
    /// Whether a resource owned by `project_id` falls in this scope.
    pub fn includes(&self, project_id: &str) -> bool {
        match self {
            TenantScope::Project(own) => own == project_id,
            TenantScope::AllTenants => true,
        }
    }
}

impl fmt::Display for TenantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantScope::Project(id) => write!(f, "project:{}", id),
            TenantScope::AllTenants => f.write_str("all-tenants"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_admin_all_tenants() {
        let ctx = RequestContext::admin("u1", "p1");
        assert_eq!(ctx.resolve_scope(true, false).unwrap(), TenantScope::AllTenants);
        assert_eq!(ctx.resolve_scope(true, true).unwrap(), TenantScope::AllTenants);
        assert_eq!(
            ctx.resolve_scope(false, false).unwrap(),
            TenantScope::Project("p1".to_string())
        );
    }

    #[test]
    fn test_non_admin_all_tenants_is_ignored() {
        let ctx = RequestContext::new("u1", "p1");
        assert_eq!(
            ctx.resolve_scope(true, false).unwrap(),
            TenantScope::Project("p1".to_string())
        );
    }

    #[test]
    fn test_non_admin_all_tenants_strict_is_forbidden() {
        let ctx = RequestContext::new("u1", "p1");
        let err = ctx.resolve_scope(true, true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_authorize_project() {
        let ctx = RequestContext::new("u1", "p1");
        assert!(ctx.authorize_project("p1").is_ok());
        assert_eq!(ctx.authorize_project("p2").unwrap_err().kind(), ErrorKind::Forbidden);
        assert!(RequestContext::admin("u1", "p1").authorize_project("p2").is_ok());
    }

    #[test]
    fn test_scope_includes() {
        assert!(TenantScope::AllTenants.includes("anything"));
        let scope = TenantScope::Project("p1".to_string());
        assert!(scope.includes("p1"));
        assert!(!scope.includes("p2"));
        assert_eq!(scope.to_string(), "project:p1");
    }
}
