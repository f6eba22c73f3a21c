//! Remote collaborators the worker depends on.
//!
//! Each is a narrow async trait so the pipeline can be driven by stubs in
//! tests and by the HTTP clients in [`http`] in production.

pub mod http;

use async_trait::async_trait;

use crate::error::ServiceError;
use crate::pipeline::artifact::ResultArtifact;
use crate::pipeline::types::{Classification, Draft, GenerationRequest, UserProfile, WorkItem};

pub use http::{HttpClassifier, HttpDelivery, HttpResponseGenerator, HttpUserDirectory};

/// Resolves a sender address to a role and client ID.
///
/// An unknown sender is `Ok(UserProfile::unknown())`, not an error. Errors
/// mean the directory could not be asked and the item should be retried.
/// Treating an outage as an unknown sender would write a permanent skip
/// artifact for a sender who may well be a client, so lookup failures retry.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve(&self, email: &str) -> Result<UserProfile, ServiceError>;
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, item: &WorkItem) -> Result<Classification, ServiceError>;
}

#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Draft, ServiceError>;
}

/// Pushes a finished artifact to the downstream ticketing system.
#[async_trait]
pub trait Delivery: Send + Sync {
    async fn deliver(&self, artifact: &ResultArtifact) -> Result<(), ServiceError>;
}
