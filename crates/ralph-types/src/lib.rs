// Shared ralph data types
// Durable entities, the run stage machine, the formal spec schema, and the
// wire models exchanged with external agents.

pub mod agent;
pub mod model;
pub mod spec;
pub mod stage;

pub use agent::{AgentResult, AgentResultStatus, CommandRun, MergeDecision, MergeVerdict};
pub use model::{
    artifact_kind, AgentAttempt, Artifact, AttemptCategory, AttemptStatus, DeliveryEvent,
    MergeDecisionRecord, RunStatus, StageTransition, Task, TaskStatus, WorkflowRun,
};
pub use spec::{FormalSpec, SpecValidationError, WorkItem, SUPPORTED_SPEC_VERSION};
pub use stage::Stage;
