// Formal Spec Schema
// Versioned YAML contract produced by the spec generator. The repository
// round-trip validates against this schema before persisting.

use serde::{Deserialize, Serialize};

pub const SUPPORTED_SPEC_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormalSpec {
    pub spec_version: u32,
    pub spec_id: String,
    pub source: SpecSource,
    pub objective: String,
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub non_goals: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<SpecConstraints>,
    #[serde(default)]
    pub design_notes: Vec<String>,
    #[serde(default)]
    pub risk_checks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_plan: Option<ValidationPlan>,
    #[serde(default)]
    pub stop_conditions: Vec<String>,
    pub work_breakdown: Vec<WorkItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecSource {
    pub github: GithubSource,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GithubSource {
    pub repo: String,
    pub issue: u64,
    pub commit_baseline: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    pub owner_role: String,
    #[serde(default)]
    pub definition_of_done: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecConstraints {
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub forbidden_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationPlan {
    #[serde(default)]
    pub ci_jobs: Vec<String>,
}

impl FormalSpec {
    /// Parse and field-validate a YAML document. Graph-level validation of
    /// the work breakdown (unknown deps, cycles) happens in the scheduler.
    pub fn from_yaml(raw: &str) -> Result<FormalSpec, SpecValidationError> {
        let spec: FormalSpec = serde_yaml::from_str(raw)
            .map_err(|e| SpecValidationError::Malformed(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), SpecValidationError> {
        if self.spec_version != SUPPORTED_SPEC_VERSION {
            return Err(SpecValidationError::UnsupportedVersion(self.spec_version));
        }
        if self.spec_id.trim().is_empty() {
            return Err(SpecValidationError::MissingField("spec_id"));
        }
        if self.objective.trim().is_empty() {
            return Err(SpecValidationError::MissingField("objective"));
        }
        if self.acceptance_criteria.is_empty() {
            return Err(SpecValidationError::MissingField("acceptance_criteria"));
        }
        if self.work_breakdown.is_empty() {
            return Err(SpecValidationError::MissingField("work_breakdown"));
        }
        for item in &self.work_breakdown {
            if item.id.trim().is_empty() || item.title.trim().is_empty() {
                return Err(SpecValidationError::InvalidWorkItem(item.id.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecValidationError {
    Malformed(String),
    UnsupportedVersion(u32),
    MissingField(&'static str),
    InvalidWorkItem(String),
}

impl std::fmt::Display for SpecValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(detail) => write!(f, "spec YAML is malformed: {}", detail),
            Self::UnsupportedVersion(version) => {
                write!(f, "unsupported spec_version {}", version)
            }
            Self::MissingField(field) => write!(f, "spec field '{}' is missing or empty", field),
            Self::InvalidWorkItem(id) => {
                write!(f, "work_breakdown item '{}' is missing id or title", id)
            }
        }
    }
}

impl std::error::Error for SpecValidationError {}
