//! HTTP implementations of the collaborator traits.
//!
//! The user directory and delivery APIs share a token-then-call scheme: POST
//! `{"username": ...}` to a `generatetoken` endpoint, then send the returned
//! token as a bearer on the real call.

use async_trait::async_trait;
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::pipeline::artifact::ResultArtifact;
use crate::pipeline::types::{
    Classification, Draft, GenerationRequest, NOT_AVAILABLE, UserProfile, WorkItem,
};
use crate::services::{Classifier, Delivery, ResponseGenerator, UserDirectory};

const USER_TOKEN_PATH: &str = "/getuserinfo/api/getuserinfo/generatetoken";
const USER_FETCH_PATH: &str = "/getuserinfo/api/getuserinfo/fetchdata";
const DELIVERY_TOKEN_PATH: &str = "/aimodelresponse/api/airesponse/generatetoken";
const DELIVERY_INSERT_PATH: &str = "/aimodelresponse/api/airesponse/insertdata";

fn build_client(config: &ServiceConfig, service: &str) -> Result<Client, ServiceError> {
    Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| ServiceError::RequestFailed {
            service: service.to_string(),
            reason: e.to_string(),
        })
}

/// POST a JSON body. Non-2xx is an error.
async fn post(
    client: &Client,
    service: &str,
    url: &str,
    bearer: Option<&str>,
    body: &impl serde::Serialize,
) -> Result<Response, ServiceError> {
    let mut request = client.post(url).json(body);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| ServiceError::RequestFailed {
            service: service.to_string(),
            reason: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ServiceError::Status {
            service: service.to_string(),
            status: status.as_u16(),
        });
    }
    Ok(response)
}

/// POST a JSON body and decode a JSON reply.
async fn post_json<R: DeserializeOwned>(
    client: &Client,
    service: &str,
    url: &str,
    bearer: Option<&str>,
    body: &impl serde::Serialize,
) -> Result<R, ServiceError> {
    post(client, service, url, bearer, body)
        .await?
        .json::<R>()
        .await
        .map_err(|e| ServiceError::InvalidResponse {
            service: service.to_string(),
            reason: e.to_string(),
        })
}

/// Token endpoints answer either a bare JSON string or `{"token": "..."}`.
async fn fetch_token(
    client: &Client,
    service: &str,
    url: &str,
    username: &SecretString,
) -> Result<String, ServiceError> {
    let reply: Value = post_json(
        client,
        service,
        url,
        None,
        &json!({ "username": username.expose_secret() }),
    )
    .await
    .map_err(|e| ServiceError::AuthFailed {
        service: service.to_string(),
        reason: e.to_string(),
    })?;

    let token = match &reply {
        Value::String(s) => Some(s.as_str()),
        Value::Object(map) => map.get("token").and_then(Value::as_str),
        _ => None,
    };

    match token.map(str::trim) {
        Some(t) if !t.is_empty() => Ok(t.to_string()),
        _ => Err(ServiceError::AuthFailed {
            service: service.to_string(),
            reason: "token endpoint returned no token".into(),
        }),
    }
}

fn value_as_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

// ── User directory ──────────────────────────────────────────────────

pub struct HttpUserDirectory {
    client: Client,
    base_url: String,
    username: SecretString,
}

impl HttpUserDirectory {
    const SERVICE: &'static str = "user directory";

    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_client(config, Self::SERVICE)?,
            base_url: config.base_url.clone(),
            username: config.token_username.clone(),
        })
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn resolve(&self, email: &str) -> Result<UserProfile, ServiceError> {
        let token = fetch_token(
            &self.client,
            Self::SERVICE,
            &format!("{}{USER_TOKEN_PATH}", self.base_url),
            &self.username,
        )
        .await?;

        let reply: Value = post_json(
            &self.client,
            Self::SERVICE,
            &format!("{}{USER_FETCH_PATH}", self.base_url),
            Some(&token),
            &json!({ "emailid": email }),
        )
        .await?;

        // `{"Table": [{"UserRole": "...", "ClientId": "..."}]}`; empty table = unknown sender.
        let Some(row) = reply
            .get("Table")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
        else {
            tracing::debug!(email, "Sender not found in user directory");
            return Ok(UserProfile::unknown());
        };

        Ok(UserProfile::new(
            value_as_string(row.get("UserRole")),
            value_as_string(row.get("ClientId")).to_lowercase(),
        ))
    }
}

// ── Classifier ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ClassifierReply {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    classification: Option<String>,
    #[serde(default)]
    is_spam: bool,
    #[serde(default)]
    escalation_required: bool,
    #[serde(default)]
    escalation_reason: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

pub struct HttpClassifier {
    client: Client,
    url: String,
}

impl HttpClassifier {
    const SERVICE: &'static str = "classifier";

    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_client(config, Self::SERVICE)?,
            url: config.classifier_url.clone(),
        })
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, item: &WorkItem) -> Result<Classification, ServiceError> {
        let body = json!({
            "from_email": item.from_address,
            "subject": item.subject,
            "content": item.body_text,
            "user_type": item.resolved_role,
        });
        let reply: ClassifierReply =
            post_json(&self.client, Self::SERVICE, &self.url, None, &body).await?;

        if reply.status.as_deref() == Some("error") {
            return Err(ServiceError::Rejected {
                service: Self::SERVICE.to_string(),
                message: reply
                    .error_message
                    .unwrap_or_else(|| "unspecified classifier error".into()),
            });
        }

        Ok(Classification {
            label: reply
                .classification
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            is_spam: reply.is_spam,
            escalation_required: reply.escalation_required,
            escalation_reason: reply.escalation_reason,
        })
    }
}

// ── Response generator ──────────────────────────────────────────────

pub struct HttpResponseGenerator {
    client: Client,
    url: String,
}

impl HttpResponseGenerator {
    const SERVICE: &'static str = "response generator";

    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_client(config, Self::SERVICE)?,
            url: config.generator_url.clone(),
        })
    }
}

#[async_trait]
impl ResponseGenerator for HttpResponseGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Draft, ServiceError> {
        post_json(&self.client, Self::SERVICE, &self.url, None, request).await
    }
}

// ── Delivery ────────────────────────────────────────────────────────

pub struct HttpDelivery {
    client: Client,
    base_url: String,
    username: SecretString,
}

impl HttpDelivery {
    const SERVICE: &'static str = "delivery";

    pub fn new(config: &ServiceConfig) -> Result<Self, ServiceError> {
        Ok(Self {
            client: build_client(config, Self::SERVICE)?,
            base_url: config.base_url.clone(),
            username: config.token_username.clone(),
        })
    }
}

#[async_trait]
impl Delivery for HttpDelivery {
    async fn deliver(&self, artifact: &ResultArtifact) -> Result<(), ServiceError> {
        let token = fetch_token(
            &self.client,
            Self::SERVICE,
            &format!("{}{DELIVERY_TOKEN_PATH}", self.base_url),
            &self.username,
        )
        .await?;

        post(
            &self.client,
            Self::SERVICE,
            &format!("{}{DELIVERY_INSERT_PATH}", self.base_url),
            Some(&token),
            artifact,
        )
        .await?;

        tracing::info!(interaction_id = %artifact.interaction_id, "Artifact delivered");
        Ok(())
    }
}
