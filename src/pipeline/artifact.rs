//! Result artifact: the one document written per processed interaction.
//!
//! The layout is what the downstream ticketing API ingests, including the
//! block of `additional_fields` placeholders it expects to be present.

use serde::{Deserialize, Serialize};

use crate::pipeline::types::{Classification, Cpg, Draft, NOT_AVAILABLE, WorkItem};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultArtifact {
    pub interaction_id: String,
    pub body: ArtifactBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactBody {
    pub interaction_id: String,
    pub from_email: String,
    pub to_email: String,
    pub subject: String,
    pub body: String,
    pub user_type: String,
    pub classification: String,
    pub escalation: Escalation,
    pub is_spam: bool,
    pub ask: String,
    pub apis_called: Vec<serde_json::Value>,
    pub response_draft: String,
    pub cpg: Cpg,
    pub additional_fields: AdditionalFields,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub escalation_required: bool,
    pub escalation_reason: String,
}

/// Fields filled in later by human agents. Always emitted as placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditionalFields {
    pub folio_number: i64,
    pub set_to_resolved: String,
    pub pms_end_client: String,
    pub lan: String,
    pub query_nature: String,
    pub location: String,
    pub others: String,
    pub reopen: String,
    pub ftr_or_follow_up: String,
    pub mode_of_interaction: String,
    pub master_department: String,
    pub department: String,
    pub query_type: String,
    pub sub_query_type: String,
    pub interaction_category: String,
    pub process_deviation: String,
    pub originated: String,
    pub beyond_tat: String,
    pub remark_of_deviation: String,
    pub updated_value: String,
    pub processed_by: String,
    pub ebot_mail_received: String,
}

impl Default for AdditionalFields {
    fn default() -> Self {
        let na = || NOT_AVAILABLE.to_string();
        Self {
            folio_number: -1,
            set_to_resolved: na(),
            pms_end_client: na(),
            lan: na(),
            query_nature: na(),
            location: na(),
            others: na(),
            reopen: na(),
            ftr_or_follow_up: na(),
            mode_of_interaction: na(),
            master_department: na(),
            department: na(),
            query_type: na(),
            sub_query_type: na(),
            interaction_category: na(),
            process_deviation: na(),
            originated: na(),
            beyond_tat: na(),
            remark_of_deviation: na(),
            updated_value: na(),
            processed_by: na(),
            ebot_mail_received: na(),
        }
    }
}

impl ResultArtifact {
    /// Assemble the artifact. Contains no timestamps, so re-running the same
    /// inputs produces a byte-identical document.
    pub fn build(item: &WorkItem, classification: &Classification, draft: &Draft) -> Self {
        let escalation_reason = classification
            .escalation_reason
            .clone()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());

        Self {
            interaction_id: item.interaction_id.clone(),
            body: ArtifactBody {
                interaction_id: item.interaction_id.clone(),
                from_email: item.from_address.clone(),
                to_email: item.to_address.clone(),
                subject: item.subject.clone(),
                body: item.body_text.clone(),
                user_type: item.resolved_role.as_str().to_string(),
                classification: classification.label.clone(),
                escalation: Escalation {
                    escalation_required: classification.escalation_required,
                    escalation_reason,
                },
                is_spam: classification.is_spam,
                ask: draft.explanation.clone(),
                apis_called: draft.apis_called.clone(),
                response_draft: draft.draft.clone(),
                cpg: draft.cpg.clone(),
                additional_fields: AdditionalFields::default(),
            },
        }
    }

    /// Artifact for an item escalated before classification.
    pub fn skipped(item: &WorkItem, reason: &str) -> Self {
        Self::build(item, &Classification::escalated(reason), &Draft::default())
    }
}
