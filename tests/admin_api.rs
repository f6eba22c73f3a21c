//! Integration tests for the admin HTTP surface.
//!
//! Each test spins up the router on a random port and talks to it over real
//! HTTP. Remote collaborators are stubs; stores live in a temp dir.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use ticket_intake::api::{AdminState, admin_routes};
use ticket_intake::config::Environment;
use ticket_intake::error::ServiceError;
use ticket_intake::pipeline::rules::RelevanceFilter;
use ticket_intake::pipeline::types::{
    Classification, Draft, GenerationRequest, UserProfile, WorkItem,
};
use ticket_intake::pipeline::worker::{IRRELEVANT_REASON, Worker};
use ticket_intake::services::{Classifier, ResponseGenerator, UserDirectory};
use ticket_intake::store::{DurableQueue, FileArtifactStore, Ledger};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// `ba@...` is a BA, `client@...` a client, everyone else unknown.
struct StubDirectory;

#[async_trait]
impl UserDirectory for StubDirectory {
    async fn resolve(&self, email: &str) -> Result<UserProfile, ServiceError> {
        Ok(match email {
            "client@example.com" => UserProfile::new("Client", "C-7"),
            "ba@example.com" => UserProfile::new("NonClient", ""),
            _ => UserProfile::new("prospect", ""),
        })
    }
}

/// Fails for subjects containing "outage", otherwise actionable.
struct StubClassifier;

#[async_trait]
impl Classifier for StubClassifier {
    async fn classify(&self, item: &WorkItem) -> Result<Classification, ServiceError> {
        if item.subject.contains("outage") {
            return Err(ServiceError::RequestFailed {
                service: "classifier".into(),
                reason: "connection refused".into(),
            });
        }
        Ok(Classification {
            label: "Account Closure".into(),
            is_spam: false,
            escalation_required: false,
            escalation_reason: None,
        })
    }
}

struct StubGenerator;

#[async_trait]
impl ResponseGenerator for StubGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Draft, ServiceError> {
        Ok(Draft {
            explanation: "Customer wants to close the account".into(),
            draft: format!("Draft for: {}", request.subject),
            ..Draft::default()
        })
    }
}

struct TestServer {
    port: u16,
    dir: tempfile::TempDir,
    queue: Arc<DurableQueue>,
    ledger: Arc<Ledger>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }
}

/// Start the admin router on a random port.
async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(DurableQueue::open(dir.path().join("queue.json")).await.unwrap());
    let dead_letters = Arc::new(
        DurableQueue::open(dir.path().join("dead_letters.json"))
            .await
            .unwrap(),
    );
    let ledger = Arc::new(Ledger::open(dir.path().join("ledger.json")).await.unwrap());

    let worker = Worker::new(
        Arc::new(StubDirectory),
        Arc::new(StubClassifier),
        Arc::new(StubGenerator),
        Arc::new(FileArtifactStore::new(dir.path().join("output"))),
        RelevanceFilter::new(&["close", "closure"]).unwrap(),
    );
    let app = admin_routes(AdminState {
        worker: Arc::new(worker),
        queue: queue.clone(),
        dead_letters,
        ledger: ledger.clone(),
        environment: Environment::Uat,
        poll_interval: Duration::from_secs(5 * 60),
        max_concurrent: 3,
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        port,
        dir,
        queue,
        ledger,
    }
}

async fn post_email(server: &TestServer, body: Value) -> Value {
    let resp = reqwest::Client::new()
        .post(server.url("/api/process-email"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

fn email(id: Value, from: &str, subject: &str) -> Value {
    json!({
        "interaction_id": id,
        "from_email": format!("Sender\r{from}"),
        "to_email": "support@example.com",
        "subject": subject,
        "content": "Please close my trading account.",
    })
}

#[tokio::test]
async fn health_reports_config_summary() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let json: Value = reqwest::get(server.url("/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(json["status"], "healthy");
        assert_eq!(json["environment"], "UAT");
        assert_eq!(json["poll_interval"], "5 minutes");
        assert_eq!(json["queue_size"], 0);
        assert_eq!(json["max_concurrent"], 3);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn queue_status_reflects_stores() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        server
            .queue
            .enqueue(vec![WorkItem::new(
                "q1",
                "a\ra@example.com",
                "support@example.com",
                "close",
                "body",
                chrono::Utc::now(),
            )])
            .await
            .unwrap();
        server.ledger.mark_completed(["done-1", "done-2"]).await.unwrap();

        let json: Value = reqwest::get(server.url("/api/queue-status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(json["status"], "active");
        assert_eq!(json["queue_size"], 1);
        assert_eq!(json["dead_letter_size"], 0);
        assert_eq!(json["completed_count"], 2);
        assert_eq!(json["max_concurrent_processing"], 3);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn process_email_returns_artifact_and_bypasses_queue() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        // Numeric IDs are accepted and stringified.
        let json = post_email(
            &server,
            email(json!(42), "client@example.com", "Close my account"),
        )
        .await;

        assert_eq!(json["status"], "success");
        assert_eq!(json["interaction_id"], "42");
        assert_eq!(json["body"]["user_type"], "client");
        assert_eq!(json["body"]["classification"], "Account Closure");
        assert_eq!(
            json["body"]["response_draft"],
            "Draft for: Close my account - my ClientId is C-7"
        );
        assert_eq!(json["body"]["additional_fields"]["folio_number"], -1);

        assert!(server.dir.path().join("output").join("42.json").exists());
        assert!(server.queue.is_empty().await);
        assert!(!server.ledger.contains("42").await);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn process_email_skips_unknown_sender() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let json = post_email(
            &server,
            email(json!("77"), "stranger@example.com", "Close my account"),
        )
        .await;

        assert_eq!(json["status"], "success");
        assert_eq!(json["body"]["escalation"]["escalation_required"], true);
        assert_eq!(
            json["body"]["escalation"]["escalation_reason"],
            "User is not a client or BA. Current User Type is prospect"
        );
        assert_eq!(json["body"]["response_draft"], "na");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn process_email_skips_irrelevant_content() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let mut body = email(json!("78"), "ba@example.com", "Statement request");
        body["content"] = json!("Please send my quarterly statement.");
        let json = post_email(&server, body).await;

        assert_eq!(json["status"], "success");
        assert_eq!(json["body"]["user_type"], "ba");
        assert_eq!(json["body"]["escalation"]["escalation_reason"], IRRELEVANT_REASON);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn process_email_reports_failure() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let json = post_email(
            &server,
            email(json!("79"), "client@example.com", "Close account during outage"),
        )
        .await;

        assert_eq!(json["status"], "failed");
        assert!(json["error"].as_str().unwrap().contains("connection refused"));
        assert!(!server.dir.path().join("output").join("79.json").exists());
    })
    .await
    .expect("test timed out");
}
