// ralph store
// The workflow repository: the only write path to durable orchestration
// state. Redaction is applied inside, so call sites cannot bypass it.

mod db;

pub use db::{NewArtifact, NewAttempt, NewEvent, RecordedEvent, WorkflowStore};
