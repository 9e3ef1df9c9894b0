//! Test data builders

use jobstore_domain::{JobDefinition, JobExecutionPriority, NewJobInfo, PropertyBag, RunningState};

/// A short-deadline local definition for timeout tests
pub fn short_lived_definition(name: &str) -> JobDefinition {
    JobDefinition::local(name, 50, 25)
}

/// A generous local definition
pub fn local_definition(name: &str) -> JobDefinition {
    JobDefinition::local(name, 600_000, 300_000)
}

/// A remote definition with an immediate polling interval
pub fn remote_definition(name: &str) -> JobDefinition {
    JobDefinition::remote(name, 600_000, 300_000, 0)
}

pub fn new_job_info(definition: &JobDefinition, state: RunningState) -> NewJobInfo {
    NewJobInfo::new(
        definition,
        state,
        JobExecutionPriority::CheckPreconditions,
        PropertyBag::new(),
    )
}
