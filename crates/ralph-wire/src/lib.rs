// Webhook Wire Layer
// The seam between the code host and everything downstream: raw-body
// signature verification and the provider-payload -> envelope mapping.

pub mod envelope;
pub mod signature;

pub use envelope::{
    extract_issue_number, extract_task_ref, is_actionable_event, map_envelope, split_repo,
    Envelope, EnvelopeActor, EnvelopeSource, TaskRef, ENVELOPE_SCHEMA_VERSION,
};
pub use signature::{sign, verify_signature};
