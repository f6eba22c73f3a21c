//! Shared types for the intake pipeline.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::pipeline::artifact::ResultArtifact;

// ── Work item ───────────────────────────────────────────────────────

/// One inbound support email waiting in the queue.
///
/// Field names on disk match the queue files written by earlier
/// deployments, so an existing `email_queue.json` loads unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Dedup key. Stable across pulls.
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub interaction_id: String,
    /// Raw source `from` field, possibly `"Display\r<addr>"`.
    #[serde(rename = "from_email")]
    pub from_address: String,
    #[serde(rename = "to_email")]
    pub to_address: String,
    pub subject: String,
    /// HTML-stripped message body.
    #[serde(rename = "content")]
    pub body_text: String,
    #[serde(rename = "created_at")]
    pub received_at: DateTime<Utc>,
    /// Filled in by the worker once the directory has answered.
    #[serde(rename = "user_type", default)]
    pub resolved_role: Role,
    /// Transient failures so far.
    #[serde(default)]
    pub attempts: u32,
    /// Most recent processing error, kept for dead-letter triage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl WorkItem {
    pub fn new(
        interaction_id: impl Into<String>,
        from_address: impl Into<String>,
        to_address: impl Into<String>,
        subject: impl Into<String>,
        body_text: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            interaction_id: interaction_id.into(),
            from_address: from_address.into(),
            to_address: to_address.into(),
            subject: subject.into(),
            body_text: body_text.into(),
            received_at,
            resolved_role: Role::Unknown,
            attempts: 0,
            last_error: None,
        }
    }

    /// Address used for the directory lookup.
    ///
    /// The source stores `"Display Name\r<address>"`; the part after the
    /// carriage return is the address. Without one the whole field is used.
    pub fn sender_address(&self) -> &str {
        match self.from_address.split_once('\r') {
            Some((_, addr)) => addr.trim(),
            None => self.from_address.trim(),
        }
    }
}

pub(crate) fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
        Uint(u64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Int(n) => n.to_string(),
        RawId::Uint(n) => n.to_string(),
    })
}

// ── Role ────────────────────────────────────────────────────────────

/// Sender role as reported by the user directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    Client,
    /// Business associate. The directory's `nonclient` role maps here.
    Ba,
    #[default]
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Ba => "ba",
            Self::Unknown => "",
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl From<&str> for Role {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "client" => Self::Client,
            "ba" | "nonclient" => Self::Ba,
            _ => Self::Unknown,
        }
    }
}

impl From<String> for Role {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Directory answer for one sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub role: Role,
    /// Role string exactly as the directory returned it, lowercased.
    pub raw_role: String,
    /// Empty when the directory has no client ID for the sender.
    pub client_id: String,
}

impl UserProfile {
    pub fn new(raw_role: impl Into<String>, client_id: impl Into<String>) -> Self {
        let raw_role = raw_role.into().trim().to_lowercase();
        Self {
            role: Role::from(raw_role.as_str()),
            raw_role,
            client_id: client_id.into().trim().to_string(),
        }
    }

    /// Profile for a sender the directory does not know.
    pub fn unknown() -> Self {
        Self::new("", "")
    }
}

// ── Classification ──────────────────────────────────────────────────

/// Coarse routing decision derived from a [`Classification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// A concrete query type; a draft should be generated.
    Actionable,
    Spam,
    Escalate,
    /// Classifier answered `"na"`.
    Unclassifiable,
}

/// Classifier verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Query type label, or `"na"`.
    pub label: String,
    pub is_spam: bool,
    pub escalation_required: bool,
    pub escalation_reason: Option<String>,
}

impl Classification {
    /// Verdict used for senders and content that never reach the classifier.
    pub fn escalated(reason: impl Into<String>) -> Self {
        Self {
            label: NOT_AVAILABLE.to_string(),
            is_spam: false,
            escalation_required: true,
            escalation_reason: Some(reason.into()),
        }
    }

    /// Spam wins over escalation, escalation over an `"na"` label.
    pub fn category(&self) -> Category {
        if self.is_spam {
            Category::Spam
        } else if self.escalation_required {
            Category::Escalate
        } else if self.label.trim().is_empty() || self.label.eq_ignore_ascii_case(NOT_AVAILABLE) {
            Category::Unclassifiable
        } else {
            Category::Actionable
        }
    }
}

/// Placeholder the downstream systems expect for absent values.
pub const NOT_AVAILABLE: &str = "na";

// ── Generation ──────────────────────────────────────────────────────

/// What the response generator is asked to answer.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub from_email: String,
    /// Subject, augmented with the client ID when one is known.
    pub subject: String,
    pub content: String,
    pub user_type: Role,
    pub classification: String,
}

/// Scenario metadata attached to a draft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Cpg {
    pub scenario_id: String,
    pub scenario_name: String,
    pub sop: String,
    pub path: String,
}

impl Default for Cpg {
    fn default() -> Self {
        Self {
            scenario_id: NOT_AVAILABLE.into(),
            scenario_name: NOT_AVAILABLE.into(),
            sop: NOT_AVAILABLE.into(),
            path: NOT_AVAILABLE.into(),
        }
    }
}

/// Generated response. Missing fields come back as `"na"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Draft {
    /// What the sender is asking for.
    pub explanation: String,
    pub apis_called: Vec<serde_json::Value>,
    pub draft: String,
    pub scenario_id: String,
    pub cpg: Cpg,
}

impl Default for Draft {
    fn default() -> Self {
        Self {
            explanation: NOT_AVAILABLE.into(),
            apis_called: Vec::new(),
            draft: NOT_AVAILABLE.into(),
            scenario_id: NOT_AVAILABLE.into(),
            cpg: Cpg::default(),
        }
    }
}

// ── Outcome ─────────────────────────────────────────────────────────

/// Why an item finished without a generated response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Spam,
    Escalated,
    Unclassifiable,
    UnknownSender,
    Irrelevant,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Spam => "spam",
            Self::Escalated => "escalated",
            Self::Unclassifiable => "unclassifiable",
            Self::UnknownSender => "unknown_sender",
            Self::Irrelevant => "irrelevant",
        }
    }
}

/// Result of running one item through the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Draft generated and artifact written.
    Responded,
    /// Terminal: artifact written, no draft.
    Skipped { reason: SkipReason },
    /// Transient: leave the item queued.
    Retry { error: String },
    /// Permanent: the item can never succeed.
    Reject { error: String },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Responded => "responded",
            Self::Skipped { .. } => "skipped",
            Self::Retry { .. } => "retry",
            Self::Reject { .. } => "reject",
        }
    }

    /// Whether the item is finished and belongs in the ledger.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Responded | Self::Skipped { .. })
    }
}

/// What the worker hands back to the drainer.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub interaction_id: String,
    pub outcome: Outcome,
    /// Present whenever the artifact was written.
    pub artifact: Option<ResultArtifact>,
}

impl WorkerReport {
    pub fn is_completed(&self) -> bool {
        self.outcome.is_completed()
    }
}

#[cfg(test)]
pub(crate) fn test_item(id: &str) -> WorkItem {
    use chrono::TimeZone;

    WorkItem::new(
        id,
        "Jane Client\rjane@example.com",
        "support@example.com",
        "Please close my account",
        "I want to close my trading account.",
        Utc.with_ymd_and_hms(2025, 5, 12, 10, 0, 0).unwrap(),
    )
}
