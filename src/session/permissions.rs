//! Permission gating for tracking sessions.

use std::fmt;

use serde::Serialize;

/// A capability the host must grant before tracking may start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Location,
    Network,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Location => f.write_str("location"),
            Permission::Network => f.write_str("network"),
        }
    }
}

/// Everything a session needs.
pub const REQUIRED_PERMISSIONS: [Permission; 2] = [Permission::Location, Permission::Network];

/// Reports which required permissions are currently missing.
pub trait PermissionGate: Send + Sync {
    fn missing(&self) -> Vec<Permission>;
}

/// Permissions fixed at construction.
#[derive(Debug, Clone)]
pub struct StaticPermissions {
    granted: Vec<Permission>,
}

impl StaticPermissions {
    pub fn new(granted: Vec<Permission>) -> Self {
        Self { granted }
    }

    pub fn all_granted() -> Self {
        Self::new(REQUIRED_PERMISSIONS.to_vec())
    }

    pub fn none_granted() -> Self {
        Self::new(Vec::new())
    }
}

impl PermissionGate for StaticPermissions {
    fn missing(&self) -> Vec<Permission> {
        REQUIRED_PERMISSIONS
            .iter()
            .copied()
            .filter(|p| !self.granted.contains(p))
            .collect()
    }
}
