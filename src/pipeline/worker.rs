//! Worker: runs one work item end to end.
//!
//! Flow:
//! 1. Relevance filter (local, no remote call)
//! 2. User directory lookup → unknown senders are escalated
//! 3. Irrelevant mail → terminal skip
//! 4. Classifier → spam / escalate / na skip, otherwise generate a draft
//! 5. Write the artifact, then deliver it if delivery is enabled
//!
//! The worker never touches the queue or the ledger. It reports an
//! [`Outcome`] and the drainer reconciles.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::pipeline::artifact::ResultArtifact;
use crate::pipeline::rules::RelevanceFilter;
use crate::pipeline::types::{
    Category, Draft, GenerationRequest, Outcome, SkipReason, WorkItem, WorkerReport,
};
use crate::services::{Classifier, Delivery, ResponseGenerator, UserDirectory};
use crate::store::ArtifactStore;

/// Escalation reason for mail the relevance filter rejects.
pub const IRRELEVANT_REASON: &str = "Account closure not required";

pub struct Worker {
    directory: Arc<dyn UserDirectory>,
    classifier: Arc<dyn Classifier>,
    generator: Arc<dyn ResponseGenerator>,
    artifacts: Arc<dyn ArtifactStore>,
    delivery: Option<Arc<dyn Delivery>>,
    relevance: RelevanceFilter,
}

impl Worker {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        classifier: Arc<dyn Classifier>,
        generator: Arc<dyn ResponseGenerator>,
        artifacts: Arc<dyn ArtifactStore>,
        relevance: RelevanceFilter,
    ) -> Self {
        Self {
            directory,
            classifier,
            generator,
            artifacts,
            delivery: None,
            relevance,
        }
    }

    /// Push every written artifact through `delivery` as well.
    pub fn with_delivery(mut self, delivery: Arc<dyn Delivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Process one item. Never fails: every error is folded into the
    /// report's [`Outcome`].
    pub async fn process(&self, item: WorkItem) -> WorkerReport {
        let started = Instant::now();
        let interaction_id = item.interaction_id.clone();
        info!(interaction_id = %interaction_id, attempts = item.attempts, "Processing started");

        let report = match self.run(item).await {
            Ok((outcome, artifact)) => WorkerReport {
                interaction_id,
                outcome,
                artifact: Some(artifact),
            },
            Err(e) if e.is_transient() => {
                warn!(interaction_id = %interaction_id, error = %e, "Processing failed, will retry");
                WorkerReport {
                    interaction_id,
                    outcome: Outcome::Retry {
                        error: e.to_string(),
                    },
                    artifact: None,
                }
            }
            Err(e) => {
                warn!(interaction_id = %interaction_id, error = %e, "Processing rejected permanently");
                WorkerReport {
                    interaction_id,
                    outcome: Outcome::Reject {
                        error: e.to_string(),
                    },
                    artifact: None,
                }
            }
        };

        let skip_reason = match &report.outcome {
            Outcome::Skipped { reason } => reason.label(),
            _ => "",
        };
        info!(
            interaction_id = %report.interaction_id,
            outcome = report.outcome.label(),
            skip_reason,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Processing finished"
        );
        report
    }

    async fn run(&self, mut item: WorkItem) -> Result<(Outcome, ResultArtifact), PipelineError> {
        if item.interaction_id.trim().is_empty() {
            return Err(PipelineError::InvalidItem("empty interaction_id".into()));
        }

        let sender = item.sender_address().to_string();
        let relevant = self.relevance.is_relevant(&item);

        let profile = self
            .directory
            .resolve(&sender)
            .await
            .map_err(PipelineError::Lookup)?;
        item.resolved_role = profile.role;
        debug!(
            interaction_id = %item.interaction_id,
            role = %profile.role,
            client_id = %profile.client_id,
            "Sender resolved"
        );

        if !profile.role.is_known() {
            let reason = format!(
                "User is not a client or BA. Current User Type is {}",
                profile.raw_role
            );
            info!(interaction_id = %item.interaction_id, sender = %sender, "Skipping: unknown sender role");
            let artifact = ResultArtifact::skipped(&item, &reason);
            self.finish(&artifact).await?;
            return Ok((
                Outcome::Skipped {
                    reason: SkipReason::UnknownSender,
                },
                artifact,
            ));
        }

        if !relevant {
            info!(interaction_id = %item.interaction_id, reason = IRRELEVANT_REASON, "Skipping: irrelevant content");
            let artifact = ResultArtifact::skipped(&item, IRRELEVANT_REASON);
            self.finish(&artifact).await?;
            return Ok((
                Outcome::Skipped {
                    reason: SkipReason::Irrelevant,
                },
                artifact,
            ));
        }

        let classification = self
            .classifier
            .classify(&item)
            .await
            .map_err(PipelineError::Classification)?;
        let category = classification.category();
        info!(
            interaction_id = %item.interaction_id,
            classification = %classification.label,
            is_spam = classification.is_spam,
            escalation = classification.escalation_required,
            "Classified"
        );

        let (outcome, draft) = match category {
            Category::Actionable => {
                let request = GenerationRequest {
                    from_email: item.from_address.clone(),
                    subject: augmented_subject(&item.subject, &profile.client_id),
                    content: item.body_text.clone(),
                    user_type: item.resolved_role,
                    classification: classification.label.clone(),
                };
                let draft = self
                    .generator
                    .generate(&request)
                    .await
                    .map_err(PipelineError::Generation)?;
                (Outcome::Responded, draft)
            }
            Category::Spam => skip(SkipReason::Spam),
            Category::Escalate => skip(SkipReason::Escalated),
            Category::Unclassifiable => skip(SkipReason::Unclassifiable),
        };

        let artifact = ResultArtifact::build(&item, &classification, &draft);
        self.finish(&artifact).await?;
        Ok((outcome, artifact))
    }

    async fn finish(&self, artifact: &ResultArtifact) -> Result<(), PipelineError> {
        self.artifacts.write(artifact).await?;
        if let Some(delivery) = &self.delivery {
            delivery
                .deliver(artifact)
                .await
                .map_err(PipelineError::Delivery)?;
        }
        Ok(())
    }
}

fn skip(reason: SkipReason) -> (Outcome, Draft) {
    (Outcome::Skipped { reason }, Draft::default())
}

/// The generator looks accounts up by client ID when it is in the subject.
fn augmented_subject(subject: &str, client_id: &str) -> String {
    if client_id.is_empty() {
        subject.to_string()
    } else {
        format!("{subject} - my ClientId is {client_id}")
    }
}
