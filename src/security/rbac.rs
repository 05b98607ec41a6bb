//! Role-Based Access Control (RBAC) Module
//!
//! Permissions are strings of the form `resource:action`. A granted `*` matches
//! everything and `resource:*` matches every action on that resource.
//!
//! Routes map to a required permission by exact `"METHOD path"` first, then by
//! the first pattern (in configuration order) whose `:param` segments line up.
//! Routes with no mapping are allowed for any authenticated caller.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

use crate::security::auth::AuthContext;
use crate::security::config::RbacSettings;

/// Authorization failure
#[derive(Debug, Error, Clone, PartialEq)]
#[error("Missing permission {permission}")]
pub struct AccessDenied {
    pub permission: String,
}

/// Route to permission mapping entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePermission {
    /// `"METHOD /path/:param"`
    pub route: String,
    pub permission: String,
}

impl RoutePermission {
    pub fn new(route: &str, permission: &str) -> Self {
        Self {
            route: route.to_string(),
            permission: permission.to_string(),
        }
    }
}

/// Check whether a granted permission covers the required one
pub fn permission_matches(granted: &str, required: &str) -> bool {
    if granted == "*" || granted == required {
        return true;
    }
    match granted.strip_suffix(":*") {
        Some(resource) => required
            .split_once(':')
            .is_some_and(|(res, _)| res == resource),
        None => false,
    }
}

fn route_key(method: &str, path: &str) -> String {
    format!("{} {}", method.to_uppercase(), path)
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim_end_matches('/').split('/').collect()
}

#[derive(Debug, Clone)]
struct RoutePattern {
    method: String,
    segments: Vec<String>,
    permission: String,
}

impl RoutePattern {
    fn parse(entry: &RoutePermission) -> Option<Self> {
        let (method, path) = entry.route.trim().split_once(' ')?;
        Some(Self {
            method: method.to_uppercase(),
            segments: split_path(path.trim()).into_iter().map(str::to_string).collect(),
            permission: entry.permission.clone(),
        })
    }

    fn matches(&self, method: &str, segments: &[&str]) -> bool {
        self.method.eq_ignore_ascii_case(method)
            && self.segments.len() == segments.len()
            && self
                .segments
                .iter()
                .zip(segments)
                .all(|(pattern, actual)| pattern.starts_with(':') || pattern == actual)
    }
}

/// Authorizer trait for checking permissions
pub trait Authorizer: Send + Sync {
    /// Check a single permission for an authenticated caller
    fn has_permission(&self, ctx: &AuthContext, permission: &str) -> bool;

    /// Permission a route requires, `None` when the route is unmapped
    fn required_permission(&self, method: &str, path: &str) -> Option<String>;

    /// Resolve the route and check the caller against it
    fn authorize(&self, ctx: &AuthContext, method: &str, path: &str) -> Result<(), AccessDenied> {
        match self.required_permission(method, path) {
            Some(permission) if !self.has_permission(ctx, &permission) => {
                debug!(subject = %ctx.subject, role = %ctx.role, permission = %permission, "Permission denied");
                Err(AccessDenied { permission })
            }
            _ => Ok(()),
        }
    }
}

/// In-memory authorizer with a static role table and per-user additive grants
#[derive(Debug)]
pub struct RoleAuthorizer {
    admin_role: String,
    roles: HashMap<String, HashSet<String>>,
    grants: DashMap<String, HashSet<String>>,
    exact: HashMap<String, String>,
    patterns: Vec<RoutePattern>,
}

impl RoleAuthorizer {
    pub fn new(settings: &RbacSettings) -> Self {
        let roles = settings
            .roles
            .iter()
            .map(|(role, perms)| (role.clone(), perms.iter().cloned().collect()))
            .collect();

        let mut exact = HashMap::new();
        let mut patterns = Vec::new();
        for entry in &settings.routes {
            let Some(pattern) = RoutePattern::parse(entry) else {
                debug!(route = %entry.route, "Skipping route permission without a method");
                continue;
            };
            exact
                .entry(route_key(&pattern.method, &pattern.segments.join("/")))
                .or_insert_with(|| entry.permission.clone());
            patterns.push(pattern);
        }

        Self {
            admin_role: settings.admin_role.clone(),
            roles,
            grants: DashMap::new(),
            exact,
            patterns,
        }
    }

    /// Add a permission on top of the user's role
    pub fn grant(&self, username: &str, permission: &str) {
        self.grants
            .entry(username.to_string())
            .or_default()
            .insert(permission.to_string());
    }

    pub fn revoke_grant(&self, username: &str, permission: &str) -> bool {
        let removed = self
            .grants
            .get_mut(username)
            .is_some_and(|mut perms| perms.remove(permission));
        self.grants.remove_if(username, |_, perms| perms.is_empty());
        removed
    }

    /// Role permissions plus the user's grants, sorted
    pub fn permissions_for(&self, role: &str, username: &str) -> Vec<String> {
        let mut all: BTreeSet<String> = self.roles.get(role).into_iter().flatten().cloned().collect();
        if let Some(grants) = self.grants.get(username) {
            all.extend(grants.iter().cloned());
        }
        all.into_iter().collect()
    }

    pub fn is_admin(&self, role: &str) -> bool {
        role == self.admin_role
    }

    /// Admin role plus every role in the role table, sorted
    pub fn known_roles(&self) -> Vec<&str> {
        let mut roles: Vec<&str> = self.roles.keys().map(String::as_str).collect();
        roles.push(self.admin_role.as_str());
        roles.sort_unstable();
        roles.dedup();
        roles
    }
}

impl Authorizer for RoleAuthorizer {
    fn has_permission(&self, ctx: &AuthContext, permission: &str) -> bool {
        if self.is_admin(&ctx.role) {
            return true;
        }

        let by_role = self
            .roles
            .get(&ctx.role)
            .is_some_and(|perms| perms.iter().any(|g| permission_matches(g, permission)));
        let by_key = ctx
            .permissions
            .iter()
            .any(|g| permission_matches(g, permission));
        let by_grant = self
            .grants
            .get(&ctx.subject)
            .is_some_and(|perms| perms.iter().any(|g| permission_matches(g, permission)));

        by_role || by_key || by_grant
    }

    fn required_permission(&self, method: &str, path: &str) -> Option<String> {
        let segments = split_path(path);
        if let Some(permission) = self.exact.get(&route_key(method, &segments.join("/"))) {
            return Some(permission.clone());
        }
        self.patterns
            .iter()
            .find(|p| p.matches(method, &segments))
            .map(|p| p.permission.clone())
    }
}
