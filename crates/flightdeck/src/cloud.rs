//! In-memory stand-in for the cloud provider and the `create_workspace`
//! flight built on top of it.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use flightdeck_flow::{Arg, Flow, OperationError, OperationRegistry, OperationSet, value};
use flightdeck_jobs::BuildError;
use flightdeck_saga::{FlightDefinition, WorkingMap};
use serde::{Deserialize, Serialize};
use tracing::info;

pub(crate) const CREATE_WORKSPACE: &str = "create_workspace";

/// Resources currently provisioned, keyed by kind.
#[derive(Debug, Default)]
pub(crate) struct InMemoryCloud {
    resources: Mutex<BTreeSet<(String, String)>>,
}

impl InMemoryCloud {
    fn resources(&self) -> MutexGuard<'_, BTreeSet<(String, String)>> {
        self.resources.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create(&self, kind: &str, name: &str) -> Result<(), OperationError> {
        if !self.resources().insert((kind.to_string(), name.to_string())) {
            return Err(OperationError::fatal(format!("{kind} '{name}' already exists"))
                .with_code("already_exists"));
        }
        info!(kind, name, "created cloud resource");
        Ok(())
    }

    /// Deleting something that is already gone succeeds.
    fn delete(&self, kind: &str, name: &str) {
        if self.resources().remove(&(kind.to_string(), name.to_string())) {
            info!(kind, name, "deleted cloud resource");
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.resources().len()
    }
}

/// Project, bucket and identity management.
pub(crate) struct Resources {
    cloud: Arc<InMemoryCloud>,
}

impl Resources {
    fn create_project(&self, workspace: String) -> Result<String, OperationError> {
        let project = format!("ws-{workspace}");
        self.cloud.create("project", &project)?;
        Ok(project)
    }

    fn delete_project(&self, workspace: String) -> Result<(), OperationError> {
        self.cloud.delete("project", &format!("ws-{workspace}"));
        Ok(())
    }

    fn create_bucket(&self, project: String) -> Result<String, OperationError> {
        let bucket = bucket_name(&project);
        self.cloud.create("bucket", &bucket)?;
        Ok(bucket)
    }

    fn delete_bucket(&self, project: String) -> Result<(), OperationError> {
        self.cloud.delete("bucket", &bucket_name(&project));
        Ok(())
    }

    fn create_identity(&self, project: String) -> Result<String, OperationError> {
        let identity = identity_name(&project);
        self.cloud.create("identity", &identity)?;
        Ok(identity)
    }

    fn delete_identity(&self, project: String) -> Result<(), OperationError> {
        self.cloud.delete("identity", &identity_name(&project));
        Ok(())
    }
}

impl OperationSet for Resources {
    fn register(registry: &mut OperationRegistry<Self>) {
        registry
            .operation("create_project", Self::create_project)
            .undo_with("delete_project");
        registry.undo("delete_project", Self::delete_project);
        registry
            .operation("create_bucket", Self::create_bucket)
            .undo_with("delete_bucket");
        registry.undo("delete_bucket", Self::delete_bucket);
        registry
            .operation("create_identity", Self::create_identity)
            .undo_with("delete_identity");
        registry.undo("delete_identity", Self::delete_identity);
    }

    fn set_name() -> &'static str {
        "Resources"
    }
}

/// Role bindings between identities and buckets.
pub(crate) struct Grants {
    cloud: Arc<InMemoryCloud>,
}

impl Grants {
    fn grant_bucket_role(&self, bucket: String, identity: String) -> Result<(), OperationError> {
        self.cloud.create("binding", &format!("{identity} -> {bucket}"))
    }

    fn revoke_bucket_role(&self, bucket: String, identity: String) -> Result<(), OperationError> {
        self.cloud.delete("binding", &format!("{identity} -> {bucket}"));
        Ok(())
    }

    #[allow(clippy::unused_self)]
    fn summarize(
        &self,
        project: String,
        bucket: String,
        identity: String,
    ) -> Result<WorkspaceSummary, OperationError> {
        Ok(WorkspaceSummary {
            project,
            bucket,
            identity,
        })
    }
}

impl OperationSet for Grants {
    fn register(registry: &mut OperationRegistry<Self>) {
        registry
            .operation("grant_bucket_role", Self::grant_bucket_role)
            .undo_with("revoke_bucket_role");
        registry.undo("revoke_bucket_role", Self::revoke_bucket_role);
        registry.operation("summarize", Self::summarize).no_undo();
    }

    fn set_name() -> &'static str {
        "Grants"
    }
}

/// Result of a successful `create_workspace` flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct WorkspaceSummary {
    pub(crate) project: String,
    pub(crate) bucket: String,
    pub(crate) identity: String,
}

fn bucket_name(project: &str) -> String {
    format!("gs://{project}-data")
}

fn identity_name(project: &str) -> String {
    format!("runner@{project}.iam")
}

/// Builds `create_workspace` flights against `cloud`.
pub(crate) fn create_workspace_factory(
    cloud: Arc<InMemoryCloud>,
) -> impl Fn(&WorkingMap) -> Result<FlightDefinition, BuildError> + Send + Sync + 'static {
    let resources = Arc::new(Resources {
        cloud: Arc::clone(&cloud),
    });
    let grants = Arc::new(Grants { cloud });
    move |input: &WorkingMap| -> Result<FlightDefinition, BuildError> {
        let workspace: String = input.get_required("workspace")?;
        if workspace.trim().is_empty() {
            return Err(BuildError::Invalid("workspace name is empty".to_string()));
        }

        let mut flow = Flow::new(CREATE_WORKSPACE);
        let project = flow
            .step(&resources)
            .call::<_, String>("create_project", value(workspace))?;
        let bucket = flow
            .step(&resources)
            .call::<_, String>("create_bucket", project)?;
        let identity = flow
            .step(&resources)
            .call::<_, String>("create_identity", project)?;
        flow.step(&grants)
            .call_unit("grant_bucket_role", (Arg::from(bucket), Arg::from(identity)))?;
        let summary = flow.step(&grants).call::<_, WorkspaceSummary>(
            "summarize",
            (Arg::from(project), Arg::from(bucket), Arg::from(identity)),
        )?;
        flow.set_result(&summary)?;
        Ok(flow.build()?)
    }
}
