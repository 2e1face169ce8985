//! Built-in job handlers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sixtask_workqueue::{HandlerError, HandlerRegistry, JobContext};
use tracing::info;

/// Job type of [`Person`] imports.
pub(crate) const PERSON_IMPORT: &str = "person_import";

/// Job type of the storage cleanup.
pub(crate) const CLEANUP: &str = "cleanup";

/// One spreadsheet row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Person {
    pub name: String,
    pub email: String,
    pub age: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Cleanup {
    #[serde(default = "default_older_than_days")]
    pub older_than_days: u32,
}

fn default_older_than_days() -> u32 {
    30
}

/// Handlers the binary ships with.
pub(crate) fn handlers() -> HandlerRegistry {
    let mut handlers = HandlerRegistry::new();
    handlers.register_json(PERSON_IMPORT, import_person);
    handlers.register_json(CLEANUP, cleanup);
    handlers
}

async fn import_person(ctx: JobContext, person: Person) -> Result<(), HandlerError> {
    if !person.email.contains('@') {
        return Err(HandlerError::failed(format!(
            "invalid email '{}' for {}",
            person.email, person.name
        )));
    }
    info!(
        "Job {} imported {} <{}>, age {}",
        ctx.job_id, person.name, person.email, person.age
    );
    Ok(())
}

async fn cleanup(ctx: JobContext, job: Cleanup) -> Result<(), HandlerError> {
    info!(
        "Job {} cleaning up entries older than {} days",
        ctx.job_id, job.older_than_days
    );
    tokio::select! {
        _ = ctx.cancelled() => Err(HandlerError::Cancelled),
        _ = tokio::time::sleep(Duration::from_millis(100)) => Ok(()),
    }
}
