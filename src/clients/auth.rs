//! Directory collaborator.
//!
//! Read-only view over the user/role directory. Lookups here may degrade
//! (see `CoreError::ExternalUnavailable`); callers retry once and then
//! proceed with what they have.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CoreResult;

/// Role membership as the directory reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRef {
    pub id: Uuid,
    pub name: String,
}

/// A user record as returned by the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub is_active: bool,
    pub is_approver: bool,
    pub executive_level_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub service_id: Option<Uuid>,
    pub manager_id: Option<Uuid>,
    pub roles: Vec<RoleRef>,
}

impl DirectoryUser {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    pub fn has_role(&self, role_id: Uuid) -> bool {
        self.roles.iter().any(|r| r.id == role_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepartmentInfo {
    pub id: Uuid,
    pub name: String,
    pub manager_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: Uuid,
    pub name: String,
    pub coordinator_id: Option<Uuid>,
}

/// Read-only directory interface.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn get_user(&self, id: Uuid) -> CoreResult<Option<DirectoryUser>>;

    /// Active users, optionally filtered by role membership.
    async fn get_users(&self, role: Option<Uuid>) -> CoreResult<Vec<DirectoryUser>>;

    async fn get_subordinates(&self, manager_id: Uuid) -> CoreResult<Vec<DirectoryUser>>;

    /// Users carrying the approver capability flag.
    async fn get_approvers(&self) -> CoreResult<Vec<DirectoryUser>>;

    async fn get_department(&self, id: Uuid) -> CoreResult<Option<DepartmentInfo>>;

    async fn get_service(&self, id: Uuid) -> CoreResult<Option<ServiceInfo>>;
}

/// In-memory directory used by the bootstrap binary and tests.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    users: DashMap<Uuid, DirectoryUser>,
    departments: DashMap<Uuid, DepartmentInfo>,
    services: DashMap<Uuid, ServiceInfo>,
}

impl InMemoryDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_user(&self, user: DirectoryUser) {
        self.users.insert(user.id, user);
    }

    pub fn insert_department(&self, dept: DepartmentInfo) {
        self.departments.insert(dept.id, dept);
    }

    pub fn insert_service(&self, service: ServiceInfo) {
        self.services.insert(service.id, service);
    }
}

#[async_trait]
impl DirectoryClient for InMemoryDirectory {
    async fn get_user(&self, id: Uuid) -> CoreResult<Option<DirectoryUser>> {
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn get_users(&self, role: Option<Uuid>) -> CoreResult<Vec<DirectoryUser>> {
        Ok(self
            .users
            .iter()
            .filter(|u| u.is_active)
            .filter(|u| role.map_or(true, |r| u.has_role(r)))
            .map(|u| u.clone())
            .collect())
    }

    async fn get_subordinates(&self, manager_id: Uuid) -> CoreResult<Vec<DirectoryUser>> {
        Ok(self
            .users
            .iter()
            .filter(|u| u.is_active && u.manager_id == Some(manager_id))
            .map(|u| u.clone())
            .collect())
    }

    async fn get_approvers(&self) -> CoreResult<Vec<DirectoryUser>> {
        Ok(self
            .users
            .iter()
            .filter(|u| u.is_active && u.is_approver)
            .map(|u| u.clone())
            .collect())
    }

    async fn get_department(&self, id: Uuid) -> CoreResult<Option<DepartmentInfo>> {
        Ok(self.departments.get(&id).map(|d| d.clone()))
    }

    async fn get_service(&self, id: Uuid) -> CoreResult<Option<ServiceInfo>> {
        Ok(self.services.get(&id).map(|s| s.clone()))
    }
}
