//! The `(hub_url, org_id, workspace_id)` tuple that scopes caches and
//! requests across the platform's discovery hierarchy.

use uuid::Uuid;

/// Immutable identity for a single workspace within a hub.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Environment {
    pub hub_url: String,
    pub org_id: Uuid,
    pub workspace_id: Uuid,
}

impl Environment {
    pub fn new(hub_url: impl Into<String>, org_id: Uuid, workspace_id: Uuid) -> Self {
        Self {
            hub_url: hub_url.into(),
            org_id,
            workspace_id,
        }
    }
}
