use serde_json::json;
use wiremock::matchers::{bearer_token, body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fleet_control::config::AgentServiceConfig;
use fleet_control::fleet::{AgentService, AgentServiceError, AgentStatus, MessageKind, SpawnSpec};
use fleet_control::{FleetControlConfig, HttpAgentService};

fn config(server: &MockServer) -> AgentServiceConfig {
    let mut config = FleetControlConfig::default().agents;
    config.base_url = server.uri();
    config.requests_per_second = 100;
    config.burst_capacity = 100;
    config
}

fn service(server: &MockServer) -> HttpAgentService {
    HttpAgentService::new(&config(server), "agent-key".to_string()).unwrap()
}

#[tokio::test]
async fn spawn_posts_the_full_repository_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v0/agents"))
        .and(bearer_token("agent-key"))
        .and(body_partial_json(json!({
            "prompt": {"text": "Fix the flaky test"},
            "source": {"repository": "https://github.com/acme/widgets", "ref": "main"},
            "target": {"autoCreatePr": true, "branchName": "agent/flaky"},
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "bc-42",
            "status": "CREATING",
            "source": {"repository": "https://github.com/acme/widgets", "ref": "main"},
            "target": {"branchName": "agent/flaky"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let spec = SpawnSpec::new("acme/widgets", "Fix the flaky test")
        .on_ref("main")
        .with_branch("agent/flaky");
    let agent = service(&server).spawn(&spec).await.unwrap();

    assert_eq!(agent.id, "bc-42");
    assert_eq!(agent.status, AgentStatus::Pending);
    assert_eq!(agent.branch_name(), Some("agent/flaky"));
}

#[tokio::test]
async fn status_reads_the_pr_from_the_target() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v0/agents/bc-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "bc-7",
            "status": "FINISHED",
            "source": {"repository": "https://github.com/acme/widgets"},
            "target": {"prUrl": "https://github.com/acme/widgets/pull/31"},
            "summary": "Added retries"
        })))
        .mount(&server)
        .await;

    let agent = service(&server).status("bc-7").await.unwrap();

    assert!(agent.status.is_terminal());
    assert_eq!(agent.pr_number(), Some(31));
    assert_eq!(agent.summary.as_deref(), Some("Added retries"));
}

#[tokio::test]
async fn unrecognized_status_reads_as_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v0/agents/bc-8"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "bc-8",
            "status": "HIBERNATING",
            "source": {"repository": "https://github.com/acme/widgets"}
        })))
        .mount(&server)
        .await;

    let agent = service(&server).status("bc-8").await.unwrap();
    assert_eq!(agent.status, AgentStatus::Unknown);
}

#[tokio::test]
async fn http_failures_map_to_typed_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v0/agents/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v0/agents/bc-1/followup"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v0/agents"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let service = service(&server);

    assert_eq!(
        service.status("missing").await.unwrap_err(),
        AgentServiceError::NotFound {
            id: "missing".to_string()
        }
    );
    assert_eq!(
        service.followup("bc-1", "hello").await.unwrap_err(),
        AgentServiceError::RateLimited
    );
    assert_eq!(
        service.list().await.unwrap_err(),
        AgentServiceError::Unauthorized
    );
}

#[tokio::test]
async fn conversation_decodes_message_kinds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v0/agents/bc-3/conversation"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "bc-3",
            "messages": [
                {"type": "user_message", "text": "Start"},
                {"type": "assistant_message", "text": "HANDOFF CONFIRMED",
                 "timestamp": "2026-01-05T10:00:00Z"}
            ]
        })))
        .mount(&server)
        .await;

    let conversation = service(&server).conversation("bc-3").await.unwrap();

    assert_eq!(conversation.agent_id, "bc-3");
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[1].kind, MessageKind::Assistant);
    assert!(conversation.messages[1].timestamp.is_some());
}

#[tokio::test]
async fn model_listing_is_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v0/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": ["claude-4-sonnet", "gpt-5"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let service = service(&server);
    let first = service.models().await.unwrap();
    let second = service.models().await.unwrap();

    assert_eq!(first, vec!["claude-4-sonnet", "gpt-5"]);
    assert_eq!(first, second);
}

#[test]
fn empty_api_key_is_rejected() {
    let config = FleetControlConfig::default().agents;
    let err = HttpAgentService::new(&config, "  ".to_string()).err();
    assert!(matches!(err, Some(AgentServiceError::NotConfigured(_))));
}
