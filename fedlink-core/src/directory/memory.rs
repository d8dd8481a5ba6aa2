//! In-memory directory implementation.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::{AuthorizationClient, DirectoryClient, DirectoryError};
use crate::model::{Application, FederationTrust, RoleAssignment, RuntimeIdentity};

#[derive(Default)]
struct State {
    applications: Vec<Application>,
    service_principals: Vec<RuntimeIdentity>,
    trusts: HashMap<String, Vec<FederationTrust>>,
    role_assignments: Vec<RoleAssignment>,
    failing_roles: HashSet<String>,
    failing_trusts: HashSet<String>,
    calls: usize,
}

/// In-memory directory and authorization backend for testing and development.
///
/// Behaves like the real providers where fedlink depends on it:
/// - Role assignments for unknown principals fail as a lookup error
/// - A second identical scope/role/principal assignment is a conflict
/// - Specific roles can be made to fail with [`fail_role`](Self::fail_role)
/// - Specific federated credentials can be made to fail with
///   [`fail_trust`](Self::fail_trust)
///
/// Every trait call is counted, so tests can assert that nothing was touched.
///
/// # Thread Safety
///
/// This implementation uses interior mutability via `Mutex` and is
/// safe to share across threads.
pub struct MemoryDirectory {
    state: Mutex<State>,
}

impl MemoryDirectory {
    /// Create a new empty directory.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Make every assignment of `role_id` (a role GUID) fail with a conflict.
    pub fn fail_role(&self, role_id: impl Into<String>) {
        self.state.lock().failing_roles.insert(role_id.into());
    }

    /// Make creation of the federated credential `name` fail with a remote write error.
    pub fn fail_trust(&self, name: impl Into<String>) {
        self.state.lock().failing_trusts.insert(name.into());
    }

    /// All registered applications.
    pub fn applications(&self) -> Vec<Application> {
        self.state.lock().applications.clone()
    }

    /// All created service principals.
    pub fn service_principals(&self) -> Vec<RuntimeIdentity> {
        self.state.lock().service_principals.clone()
    }

    /// Federated credentials of an application.
    pub fn trusts(&self, app_object_id: &str) -> Vec<FederationTrust> {
        self.state
            .lock()
            .trusts
            .get(app_object_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of federated credentials across all applications.
    pub fn trust_count(&self) -> usize {
        self.state.lock().trusts.values().map(Vec::len).sum()
    }

    /// All successful role assignments.
    pub fn role_assignments(&self) -> Vec<RoleAssignment> {
        self.state.lock().role_assignments.clone()
    }

    /// Number of trait calls served so far.
    pub fn call_count(&self) -> usize {
        self.state.lock().calls
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryDirectory")
            .field("applications", &state.applications.len())
            .field("role_assignments", &state.role_assignments.len())
            .finish()
    }
}

#[async_trait]
impl DirectoryClient for MemoryDirectory {
    async fn find_application(
        &self,
        display_name: &str,
    ) -> Result<Option<Application>, DirectoryError> {
        let mut state = self.state.lock();
        state.calls += 1;
        Ok(state
            .applications
            .iter()
            .find(|app| app.display_name == display_name)
            .cloned())
    }

    async fn create_application(
        &self,
        display_name: &str,
        description: &str,
    ) -> Result<Application, DirectoryError> {
        let mut state = self.state.lock();
        state.calls += 1;
        let app = Application {
            object_id: Uuid::new_v4().to_string(),
            client_id: Uuid::new_v4().to_string(),
            display_name: display_name.to_string(),
            description: Some(description.to_string()),
        };
        state.applications.push(app.clone());
        Ok(app)
    }

    async fn create_service_principal(
        &self,
        app_client_id: &str,
    ) -> Result<RuntimeIdentity, DirectoryError> {
        let mut state = self.state.lock();
        state.calls += 1;
        if !state.applications.iter().any(|a| a.client_id == app_client_id) {
            return Err(DirectoryError::ResourceLookup {
                resource: format!("application {}", app_client_id),
                message: "no application with this client id".to_string(),
            });
        }
        let sp = RuntimeIdentity {
            id: Uuid::new_v4().to_string(),
            app_id: app_client_id.to_string(),
        };
        state.service_principals.push(sp.clone());
        Ok(sp)
    }

    async fn list_federation_trusts(
        &self,
        app_object_id: &str,
    ) -> Result<Vec<FederationTrust>, DirectoryError> {
        let mut state = self.state.lock();
        state.calls += 1;
        Ok(state.trusts.get(app_object_id).cloned().unwrap_or_default())
    }

    async fn create_federation_trust(
        &self,
        app_object_id: &str,
        trust: &FederationTrust,
    ) -> Result<FederationTrust, DirectoryError> {
        let mut state = self.state.lock();
        state.calls += 1;
        if state.failing_trusts.contains(&trust.name) {
            return Err(DirectoryError::RemoteWrite {
                resource: format!("federated credential {}", trust.name),
                status: Some(500),
                message: "injected failure".to_string(),
            });
        }
        let existing = state.trusts.entry(app_object_id.to_string()).or_default();
        if existing.iter().any(|t| t.name == trust.name) {
            return Err(DirectoryError::Conflict {
                resource: format!("federated credential {}", trust.name),
                message: "name already in use".to_string(),
            });
        }
        let mut created = trust.clone();
        created.id = Some(Uuid::new_v4().to_string());
        existing.push(created.clone());
        Ok(created)
    }
}

#[async_trait]
impl AuthorizationClient for MemoryDirectory {
    async fn create_role_assignment(
        &self,
        assignment: &RoleAssignment,
    ) -> Result<RoleAssignment, DirectoryError> {
        let mut state = self.state.lock();
        state.calls += 1;
        let resource = format!("role assignment {}", assignment.role_definition_id);

        let failing = state
            .failing_roles
            .iter()
            .any(|role| assignment.role_definition_id.ends_with(role.as_str()));
        if failing {
            return Err(DirectoryError::Conflict {
                resource,
                message: "injected failure".to_string(),
            });
        }

        if !state
            .service_principals
            .iter()
            .any(|sp| sp.id == assignment.principal_id)
        {
            return Err(DirectoryError::ResourceLookup {
                resource,
                message: format!("principal {} does not exist", assignment.principal_id),
            });
        }

        let duplicate = state.role_assignments.iter().any(|a| {
            a.scope == assignment.scope
                && a.role_definition_id == assignment.role_definition_id
                && a.principal_id == assignment.principal_id
        });
        if duplicate {
            return Err(DirectoryError::Conflict {
                resource,
                message: "RoleAssignmentExists".to_string(),
            });
        }

        state.role_assignments.push(assignment.clone());
        Ok(assignment.clone())
    }
}
