//! End-to-end tests for `call_server` against local HTTP servers.

use std::io::Write;
use std::net::IpAddr;
use std::time::Duration;

use httpmock::prelude::*;
use qtl_api_tools::{
    AgentOptions, ApiError, BodyBytes, CallContext, ParsedBody, RequestOptions, Scheme, ServerInfo,
    build_auth, call_server,
};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("qtl_api_tools=debug")
        .with_test_writer()
        .try_init();
}

fn local(server: &MockServer, path: &str) -> RequestOptions {
    RequestOptions::new(server.host())
        .scheme(Scheme::Http)
        .port(server.port())
        .path(path)
}

async fn call(options: RequestOptions) -> (Option<ParsedBody>, CallContext) {
    call_server(options, |body, ctx| (body, ctx))
        .await
        .unwrap()
        .expect("callback should have run")
}

fn gzip_compress(data: &[u8]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::GzEncoder;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn brotli_compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut writer = brotli::CompressorWriter::new(&mut out, 4096, 5, 22);
        writer.write_all(data).unwrap();
    }
    out
}

fn job_list() -> String {
    let jobs: Vec<_> = (0..200)
        .map(|i| json!({"id": i, "state": "queued", "owner": "render-farm"}))
        .collect();
    json!({ "jobs": jobs }).to_string()
}

#[tokio::test]
async fn json_body_is_parsed_and_context_filled() {
    init_tracing();
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/api/jobs");
        then.status(200)
            .header("content-type", "application/json; charset=utf-8")
            .body(r#"{"jobs":[{"id":1}]}"#);
    });

    let (body, ctx) = call(local(&server, "/api/jobs")).await;

    mock.assert_calls(1);
    assert_eq!(body.unwrap().as_json(), Some(&json!({"jobs": [{"id": 1}]})));
    assert!(ctx.err.is_none());
    assert_eq!(ctx.status, Some(http::StatusCode::OK));
    assert_eq!(
        ctx.body_bytes,
        Some(BodyBytes {
            raw: 19,
            decoded: 19
        })
    );
    assert!(ctx.times.header.is_some());
    assert!(ctx.times.header_latency() <= ctx.times.total_latency());
    assert!(ctx.peer_certificate.is_none());
    assert_eq!(ctx.options.path, "/api/jobs");
}

#[tokio::test]
async fn remote_address_is_recorded() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/ping");
        then.status(200).body("pong");
    });

    let (_, ctx) = call(local(&server, "/ping")).await;

    let addr = ctx.remote_address.unwrap();
    assert!(addr.ip().is_loopback());
    assert_eq!(addr.port(), server.port());
}

#[tokio::test]
async fn gzip_body_is_decoded_and_both_sizes_reported() {
    let payload = job_list();
    let compressed = gzip_compress(payload.as_bytes());
    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/gz");
        then.status(200)
            .header("content-type", "application/json")
            .header("content-encoding", "gzip")
            .body(&compressed);
    });

    let (body, ctx) = call(local(&server, "/gz")).await;

    let bytes = ctx.body_bytes.unwrap();
    assert_eq!(bytes.raw, compressed.len());
    assert_eq!(bytes.decoded, payload.len());
    assert!(bytes.raw < bytes.decoded);
    let jobs = body.unwrap().into_value();
    assert_eq!(jobs["jobs"].as_array().unwrap().len(), 200);
}

#[tokio::test]
async fn brotli_body_is_decoded() {
    let payload = job_list();
    let compressed = brotli_compress(payload.as_bytes());
    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/br");
        then.status(200)
            .header("content-type", "application/json")
            .header("content-encoding", "br")
            .body(&compressed);
    });

    let (body, ctx) = call(local(&server, "/br")).await;

    let bytes = ctx.body_bytes.unwrap();
    assert_eq!(bytes.raw, compressed.len());
    assert_eq!(bytes.decoded, payload.len());
    assert_eq!(body.unwrap().into_value()["jobs"][199]["id"], 199);
}

#[tokio::test]
async fn xml_body_is_parsed() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/status.xml");
        then.status(200)
            .header("content-type", "application/xml")
            .body(r#"<farm nodes="2"><node>n1</node><node>n2</node></farm>"#);
    });

    let (body, ctx) = call(local(&server, "/status.xml")).await;

    assert!(ctx.err.is_none());
    let doc = body.unwrap();
    let doc = doc.as_xml().unwrap();
    assert_eq!(doc.root.attribute("nodes"), Some("2"));
    assert_eq!(
        doc.to_value(),
        json!({"farm": {"$": {"nodes": "2"}, "node": ["n1", "n2"]}})
    );
}

#[tokio::test]
async fn malformed_xml_reaches_callback_with_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/broken.xml");
        then.status(200)
            .header("content-type", "application/xml")
            .body("<a><b></a>");
    });

    let (body, ctx) = call(local(&server, "/broken.xml")).await;

    assert!(body.is_none());
    assert!(matches!(ctx.err, Some(ApiError::Xml(_))));
    assert!(ctx.body_bytes.is_some());
}

#[tokio::test]
async fn other_content_types_pass_through_as_text() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/motd");
        then.status(200)
            .header("content-type", "text/xml")
            .body("<not-parsed/>");
    });

    let (body, _) = call(local(&server, "/motd")).await;

    assert_eq!(body.unwrap().as_text(), Some("<not-parsed/>"));
}

#[tokio::test]
async fn malformed_json_is_returned_as_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/bad");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"jobs": ["#);
    });

    let mut called = false;
    let result = call_server(local(&server, "/bad"), |_, _| called = true).await;

    assert!(matches!(result, Err(ApiError::Json(_))));
    assert!(!called);
}

#[tokio::test]
async fn error_status_with_abort_skips_callback() {
    init_tracing();
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.path("/fail");
        then.status(500)
            .header("content-type", "application/json")
            .body(r#"{"error":"boom"}"#);
    });

    let mut called = false;
    let result = call_server(local(&server, "/fail").abort_on_error(true), |_, _| {
        called = true;
    })
    .await;

    mock.assert_calls(1);
    assert!(matches!(result, Ok(None)));
    assert!(!called);
}

#[tokio::test]
async fn error_status_without_abort_still_parses_body() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/missing");
        then.status(404)
            .header("content-type", "application/json")
            .body(r#"{"error":"no such job"}"#);
    });

    let (body, ctx) = call(local(&server, "/missing").quiet(true)).await;

    assert_eq!(ctx.status, Some(http::StatusCode::NOT_FOUND));
    assert!(ctx.err.is_none());
    assert_eq!(body.unwrap().into_value()["error"], "no such job");
}

#[tokio::test]
async fn created_counts_as_ok() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/jobs");
        then.status(201)
            .header("content-type", "application/json")
            .body(r#"{"id":"j-9"}"#);
    });

    let options = local(&server, "/api/jobs")
        .method(http::Method::POST)
        .body(r#"{"name":"nightly"}"#)
        .abort_on_error(true);
    let id = call_server(options, |body, _| body.unwrap().into_value()["id"].clone())
        .await
        .unwrap();

    assert_eq!(id, Some(json!("j-9")));
}

#[tokio::test]
async fn request_body_gets_byte_length_content_length() {
    let text = "h\u{e9}llo w\u{f6}rld";
    assert_eq!(text.len(), 13);

    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/notes")
            .header("content-length", "13")
            .body(text);
        then.status(200).body("ok");
    });

    let options = local(&server, "/notes")
        .method(http::Method::POST)
        .body(text);
    let (body, ctx) = call(options).await;

    mock.assert_calls(1);
    assert_eq!(body.unwrap().as_text(), Some("ok"));
    assert_eq!(ctx.options.headers["content-length"], "13");
}

#[tokio::test]
async fn empty_request_body_counts_as_absent() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET).path("/empty");
        then.status(200).body("ok");
    });

    let (_, ctx) = call(local(&server, "/empty").body("")).await;

    mock.assert_calls(1);
    assert!(ctx.options.headers.get("content-length").is_none());
}

#[tokio::test]
async fn decoded_size_counts_bytes_not_characters() {
    let text = "gr\u{fc}\u{df}e";
    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/greeting");
        then.status(200)
            .header("content-type", "text/plain; charset=utf-8")
            .body(text);
    });

    let (body, ctx) = call(local(&server, "/greeting")).await;

    assert_eq!(body.unwrap().as_text(), Some(text));
    assert_eq!(text.chars().count(), 5);
    assert_eq!(ctx.body_bytes.unwrap().decoded, 7);
}

#[tokio::test]
async fn signed_request_carries_auth_headers() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/whoami")
            .header_exists("authorization")
            .header_exists("date")
            .header("accept", "application/json")
            .header("accept-encoding", "gzip");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"user":"alice"}"#);
    });

    let info = ServerInfo::new(server.host(), "alice", "s3cr3t");
    let options = build_auth(&info)
        .unwrap()
        .scheme(Scheme::Http)
        .port(server.port())
        .path("/api/whoami");
    let (body, ctx) = call(options).await;

    mock.assert_calls(1);
    assert_eq!(body.unwrap().into_value()["user"], "alice");
    assert_eq!(ctx.options.timeout, Some(Duration::from_secs(10)));
}

#[tokio::test]
async fn resolve_override_reaches_local_server() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.path("/pinned");
        then.status(200).body("pinned");
    });

    let loopback: IpAddr = server.host().parse().unwrap();
    let options = RequestOptions::new("cnc.farm.invalid")
        .scheme(Scheme::Http)
        .port(server.port())
        .path("/pinned")
        .agent_options(AgentOptions::default().resolve("cnc.farm.invalid", loopback));
    let (body, ctx) = call(options).await;

    mock.assert_calls(1);
    assert_eq!(body.unwrap().as_text(), Some("pinned"));
    assert_eq!(ctx.remote_address.unwrap().ip(), loopback);
}

#[tokio::test]
async fn shared_agent_serves_several_calls() {
    let server = MockServer::start();
    let mock = server.mock(|when, then| {
        when.path("/tick");
        then.status(200).body("tock");
    });

    let agent = qtl_api_tools::Agent::new(AgentOptions::default()).unwrap();
    for _ in 0..3 {
        let (body, _) = call(local(&server, "/tick").agent(agent.clone())).await;
        assert_eq!(body.unwrap().as_text(), Some("tock"));
    }

    mock.assert_calls(3);
}

#[tokio::test]
async fn caller_context_is_carried_through() {
    #[derive(Clone, Debug, PartialEq)]
    struct JobTag(&'static str);

    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/tagged");
        then.status(200).body("ok");
    });

    let mut ctx = CallContext::new();
    ctx.extensions.insert(JobTag("nightly"));
    let (_, ctx) = call(local(&server, "/tagged").ctx(ctx)).await;

    assert_eq!(ctx.extensions.get::<JobTag>(), Some(&JobTag("nightly")));
    assert_eq!(ctx.status, Some(http::StatusCode::OK));
}

#[tokio::test]
async fn refused_connection_reaches_callback_with_error() {
    init_tracing();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let options = RequestOptions::new("127.0.0.1")
        .scheme(Scheme::Http)
        .port(port)
        .path("/");
    let mut calls = 0;
    let (body, ctx) = call_server(options, |body, ctx| {
        calls += 1;
        (body, ctx)
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(calls, 1);
    assert!(body.is_none());
    assert!(ctx.err.as_ref().is_some_and(ApiError::is_transport));
    assert!(ctx.status.is_none());
    assert!(ctx.times.finish.is_some());
}

#[tokio::test]
async fn refused_connection_with_abort_skips_callback() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let options = RequestOptions::new("127.0.0.1")
        .scheme(Scheme::Http)
        .port(port)
        .abort_on_error(true);
    let mut called = false;
    let result = call_server(options, |_, _| called = true).await;

    assert!(matches!(result, Ok(None)));
    assert!(!called);
}

#[tokio::test]
async fn silent_server_triggers_idle_timeout() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let silent = tokio::spawn(async move {
        // Accept and hold the socket without ever answering.
        let (socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(socket);
    });

    let options = RequestOptions::new("127.0.0.1")
        .scheme(Scheme::Http)
        .port(port)
        .timeout(Duration::from_millis(200));
    let (body, ctx) = call(options).await;

    assert!(body.is_none());
    assert!(matches!(
        ctx.err,
        Some(ApiError::Timeout(d)) if d == Duration::from_millis(200)
    ));
    silent.abort();
}

#[tokio::test]
async fn spawned_call_delivers_result() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/bg");
        then.status(200)
            .header("content-type", "application/json")
            .body(r#"{"done":true}"#);
    });

    let handle = qtl_api_tools::spawn_call(local(&server, "/bg"), |body, ctx| {
        (body.map(ParsedBody::into_value), ctx.status)
    });
    let (value, status) = handle.await.unwrap().unwrap().unwrap();

    assert_eq!(value, Some(json!({"done": true})));
    assert_eq!(status, Some(http::StatusCode::OK));
}

#[tokio::test]
async fn debug_mode_does_not_change_outcome() {
    init_tracing();
    let server = MockServer::start();
    server.mock(|when, then| {
        when.path("/dbg");
        then.status(200)
            .header("content-type", "application/json")
            .header("x-node", "n1")
            .body("[1,2,3]");
    });

    let (body, _) = call(local(&server, "/dbg").debug(true)).await;

    assert_eq!(body.unwrap().into_value(), json!([1, 2, 3]));
}
