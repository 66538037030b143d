//! End-to-end routing against mock A2A agents
//!
//! Each test stands up wiremock servers in place of the remote agents and
//! drives the full pipeline over real HTTP: classification, discovery,
//! forwarding and formatting.


use agent_router::error::ErrorKind;
use futures::future::join_all;
use serde_json::{json, Value};
use test_helpers::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_search(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/assistants/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(search_listing(&[("a0", "Other"), ("a1", "Jira Assistant")])),
        )
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn forwarded_bodies(server: &MockServer) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == "/a2a/a1")
        .map(|request| request.body_json::<Value>().unwrap())
        .collect()
}

#[tokio::test]
async fn test_routes_request_to_matching_agent() {
    let server = MockServer::start().await;
    mount_search(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/a2a/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(a2a_reply("Ticket T-1 is open.", None)))
        .expect(1)
        .mount(&server)
        .await;

    let pipeline = pipeline_from_yaml(&jira_config_yaml(server.address().port()));
    let response = pipeline
        .run_with_timeout("what's the status of jira ticket T-1?")
        .await;

    assert!(response.is_ok(), "unexpected response: {response:?}");
    assert_eq!(response.response_text(), Some("Ticket T-1 is open."));
    assert_eq!(response.agent_key(), Some("jira"));

    let bodies = forwarded_bodies(&server).await;
    assert_eq!(bodies[0]["jsonrpc"], "2.0");
    assert_eq!(bodies[0]["method"], "message/send");
    assert_eq!(
        bodies[0]["params"]["message"]["parts"][0]["text"],
        "what's the status of jira ticket T-1?"
    );
}

#[tokio::test]
async fn test_unmatched_request_makes_no_calls() {
    let server = MockServer::start().await;

    let pipeline = pipeline_from_yaml(&jira_config_yaml(server.address().port()));
    let response = pipeline.run_with_timeout("what's the weather?").await;

    assert_eq!(response.error_kind(), Some(ErrorKind::Classification));
    assert!(response
        .error_message()
        .unwrap()
        .contains("no matching agent"));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_discovery_is_cached_and_thread_is_continued() {
    let server = MockServer::start().await;
    mount_search(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/a2a/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(a2a_reply("first", Some("thread-9"))))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/a2a/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(a2a_reply("second", None)))
        .mount(&server)
        .await;

    let pipeline = pipeline_from_yaml(&jira_config_yaml(server.address().port()));
    let first = pipeline.run_with_timeout("jira ticket one").await;
    let second = pipeline.run_with_timeout("jira ticket two").await;

    assert_eq!(first.response_text(), Some("first"));
    assert_eq!(second.response_text(), Some("second"));
    assert_eq!(second.thread_id(), Some("thread-9"));

    let bodies = forwarded_bodies(&server).await;
    assert_eq!(bodies.len(), 2);
    assert!(bodies[0]["params"].get("thread").is_none());
    assert_eq!(bodies[1]["params"]["thread"]["threadId"], "thread-9");
}

#[tokio::test]
async fn test_transient_failures_are_retried_up_to_max_attempts() {
    let server = MockServer::start().await;
    mount_search(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/a2a/a1"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(3)
        .mount(&server)
        .await;

    let pipeline = pipeline_from_yaml(&jira_config_yaml(server.address().port()));
    let response = pipeline.run_with_timeout("jira ticket T-2").await;

    assert_eq!(response.error_kind(), Some(ErrorKind::Forward));
}

#[tokio::test]
async fn test_recovers_after_transient_failure() {
    let server = MockServer::start().await;
    mount_search(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/a2a/a1"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/a2a/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(a2a_reply("recovered", None)))
        .mount(&server)
        .await;

    let pipeline = pipeline_from_yaml(&jira_config_yaml(server.address().port()));
    let response = pipeline.run_with_timeout("jira ticket T-3").await;

    assert_eq!(response.response_text(), Some("recovered"));
    assert_eq!(forwarded_bodies(&server).await.len(), 2);
}

#[tokio::test]
async fn test_not_found_is_not_retried_and_rediscovers_next_time() {
    let server = MockServer::start().await;
    mount_search(&server, 2).await;
    Mock::given(method("POST"))
        .and(path("/a2a/a1"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such assistant"))
        .expect(2)
        .mount(&server)
        .await;

    let pipeline = pipeline_from_yaml(&jira_config_yaml(server.address().port()));
    let first = pipeline.run_with_timeout("jira ticket T-4").await;
    let second = pipeline.run_with_timeout("jira ticket T-4").await;

    assert_eq!(first.error_kind(), Some(ErrorKind::Forward));
    assert_eq!(second.error_kind(), Some(ErrorKind::Forward));
}

#[tokio::test]
async fn test_unknown_assistant_name_fails_discovery() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/assistants/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_listing(&[("a0", "Other")])))
        .mount(&server)
        .await;

    let pipeline = pipeline_from_yaml(&jira_config_yaml(server.address().port()));
    let response = pipeline.run_with_timeout("jira ticket T-5").await;

    assert_eq!(response.error_kind(), Some(ErrorKind::Discovery));
    assert!(forwarded_bodies(&server).await.is_empty());
}

#[tokio::test]
async fn test_unreachable_agent_is_a_discovery_error() {
    // Bind then drop a server so the port is very likely closed
    let port = {
        let server = MockServer::start().await;
        server.address().port()
    };

    let pipeline = pipeline_from_yaml(&jira_config_yaml(port));
    let response = pipeline.run_with_timeout("jira ticket T-6").await;

    assert_eq!(response.error_kind(), Some(ErrorKind::Discovery));
    assert!(response.error_message().unwrap().contains("could not connect"));
}

#[tokio::test]
async fn test_registry_resolves_identifier() {
    let agent = MockServer::start().await;
    let registry = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/a2a/registry-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(a2a_reply(r#"{"assistant_id": "a1"}"#, None)),
        )
        .expect(1)
        .mount(&registry)
        .await;
    Mock::given(method("POST"))
        .and(path("/a2a/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(a2a_reply("via registry", None)))
        .expect(1)
        .mount(&agent)
        .await;

    let yaml = format!(
        r#"
agents:
  jira:
    port: {agent_port}
    name: Jira Assistant
    registry_enabled: true
registry:
  port: {registry_port}
  assistant_id: registry-1
routing:
  retries:
    max_attempts: 2
    backoff_base_ms: 5
    backoff_cap_ms: 10
"#,
        agent_port = agent.address().port(),
        registry_port = registry.address().port(),
    );

    let pipeline = pipeline_from_yaml(&yaml);
    let response = pipeline.run_with_timeout("jira please").await;

    assert_eq!(response.response_text(), Some("via registry"));

    let registry_request = &registry.received_requests().await.unwrap()[0];
    let body: Value = registry_request.body_json().unwrap();
    assert_eq!(
        body["params"]["message"]["parts"][0]["text"],
        json!("Find assistant for project: Jira Assistant")
    );
}

#[tokio::test]
async fn test_response_serializes_with_status_tag() {
    let server = MockServer::start().await;
    mount_search(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/a2a/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(a2a_reply("done", Some("t-1"))))
        .mount(&server)
        .await;

    let pipeline = pipeline_from_yaml(&jira_config_yaml(server.address().port()));
    let response = pipeline.run_with_timeout("sprint planning").await;

    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({"status": "ok", "response_text": "done", "agent_key": "jira", "thread_id": "t-1"})
    );
}

#[tokio::test]
async fn test_concurrent_requests_all_complete() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/assistants/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(search_listing(&[("a1", "Jira Assistant")])),
        )
        .expect(1..)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/a2a/a1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(a2a_reply("pong", None)))
        .expect(8)
        .mount(&server)
        .await;

    let yaml = format!(
        "{}  max_in_flight: 2\n",
        jira_config_yaml(server.address().port())
    );
    let pipeline = pipeline_from_yaml(&yaml);

    let requests = (0..8).map(|i| {
        let text = format!("jira ticket T-{i}");
        let pipeline = &pipeline;
        async move { pipeline.run_with_timeout(&text).await }
    });
    let responses = join_all(requests).await;

    assert!(responses.iter().all(|r| r.response_text() == Some("pong")));
}
