use chrono::Duration;

use super::domain::{StageName, SubjectType};
use super::VerificationError;
use crate::config::VerificationConfig;

/// How a stage is driven forward by the applicant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Applicant submits evidence references.
    Evidence,
    /// Applicant books a slot; the interview event moves it to review.
    Interview,
}

/// Static description of one stage in a subject's pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDefinition {
    pub name: StageName,
    pub kind: StageKind,
    pub requires_human_review: bool,
    pub min_evidence: usize,
    /// How long an approval stays valid, measured from the decision.
    pub expiry: Option<Duration>,
}

impl StageDefinition {
    pub fn evidence(name: StageName, min_evidence: usize) -> Self {
        Self {
            name,
            kind: StageKind::Evidence,
            requires_human_review: true,
            min_evidence,
            expiry: None,
        }
    }

    pub fn interview() -> Self {
        Self {
            name: StageName::Interview,
            kind: StageKind::Interview,
            requires_human_review: true,
            min_evidence: 0,
            expiry: None,
        }
    }

    pub fn expires_after(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn without_review(mut self) -> Self {
        self.requires_human_review = false;
        self
    }
}

/// Ordered, non-empty stage list for one subject type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDefinition {
    subject_type: SubjectType,
    stages: Vec<StageDefinition>,
}

impl PipelineDefinition {
    pub fn new(
        subject_type: SubjectType,
        stages: Vec<StageDefinition>,
    ) -> Result<Self, VerificationError> {
        if stages.is_empty() {
            return Err(VerificationError::InvalidDefinition(format!(
                "{} pipeline has no stages",
                subject_type.label()
            )));
        }

        for (index, stage) in stages.iter().enumerate() {
            if stages[..index].iter().any(|prior| prior.name == stage.name) {
                return Err(VerificationError::InvalidDefinition(format!(
                    "stage {} appears twice in the {} pipeline",
                    stage.name.key(),
                    subject_type.label()
                )));
            }
        }

        Ok(Self {
            subject_type,
            stages,
        })
    }

    pub fn subject_type(&self) -> SubjectType {
        self.subject_type
    }

    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn stage(&self, name: StageName) -> Option<&StageDefinition> {
        self.stages.iter().find(|stage| stage.name == name)
    }
}

/// Stage sequences for every subject type the platform verifies.
#[derive(Debug, Clone)]
pub struct PipelineBlueprint {
    caregiver: PipelineDefinition,
    agency: PipelineDefinition,
}

impl PipelineBlueprint {
    pub fn new(caregiver: PipelineDefinition, agency: PipelineDefinition) -> Self {
        Self { caregiver, agency }
    }

    pub fn standard(config: &VerificationConfig) -> Self {
        let police_clearance_validity =
            Duration::days(i64::from(config.police_clearance_validity_days));

        let caregiver = PipelineDefinition {
            subject_type: SubjectType::Caregiver,
            stages: vec![
                StageDefinition::evidence(StageName::Certificates, 1),
                StageDefinition::evidence(StageName::PoliceClearance, 1)
                    .expires_after(police_clearance_validity),
                StageDefinition::interview(),
                StageDefinition::evidence(StageName::PsychTest, 1),
                StageDefinition::evidence(StageName::DocumentCheck, 1),
                StageDefinition::evidence(StageName::FinalApproval, 0),
            ],
        };

        let agency = PipelineDefinition {
            subject_type: SubjectType::Agency,
            stages: vec![
                StageDefinition::evidence(StageName::LegalDocuments, 1),
                StageDefinition::evidence(StageName::PhysicalVerification, 1),
                StageDefinition::evidence(StageName::FinalApproval, 0),
            ],
        };

        Self { caregiver, agency }
    }

    pub fn for_subject(&self, subject_type: SubjectType) -> &PipelineDefinition {
        match subject_type {
            SubjectType::Caregiver => &self.caregiver,
            SubjectType::Agency => &self.agency,
        }
    }
}
