//! Gmail adapter against a wiremock server standing in for both the OAuth
//! token endpoint and the Gmail REST API.

use std::collections::HashSet;

use base64::prelude::*;
use serde_json::{Value, json};
use wiremock::matchers::{
    body_json, body_partial_json, body_string_contains, header, method, path, query_param,
    query_param_is_missing,
};
use wiremock::{Mock, MockServer, ResponseTemplate};

use inbox_responder::channels::{GmailMailbox, MessageSink, MessageSource};
use inbox_responder::config::GmailConfig;

const API: &str = "/gmail/v1/users/me";

const OLDER: &str = "From: Alice <alice@example.org>\r\n\
    To: assistant@example.com\r\n\
    Subject: Opening hours\r\n\
    Date: Mon, 6 Jan 2025 10:00:00 +0000\r\n\
    Message-ID: <hours@example.org>\r\n\
    \r\n\
    Are you open on Saturday?\r\n";

const NEWER: &str = "From: Bob <bob@example.org>\r\n\
    To: assistant@example.com\r\n\
    Subject: Invoice\r\n\
    Date: Tue, 7 Jan 2025 09:00:00 +0000\r\n\
    Message-ID: <invoice@example.org>\r\n\
    \r\n\
    Could you resend the invoice?\r\n";

struct Fixture {
    server: MockServer,
    mailbox: GmailMailbox,
    _dir: tempfile::TempDir,
}

async fn setup() -> Fixture {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let token_path = dir.path().join("token.json");
    std::fs::write(
        &token_path,
        json!({
            "refresh_token": "refresh-1",
            "client_id": "client-1",
            "client_secret": "secret-1",
            "token_uri": format!("{}/token", server.uri()),
        })
        .to_string(),
    )
    .unwrap();

    let config = GmailConfig {
        credentials_path: dir.path().join("credentials.json"),
        token_path,
    };
    let mailbox = GmailMailbox::new(&config, "assistant@example.com", 10)
        .unwrap()
        .with_base_url(format!("{}{API}", server.uri()));

    Fixture {
        server,
        mailbox,
        _dir: dir,
    }
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "ya29.test", "expires_in": 3600 })),
        )
        .expect(1)
        .mount(server)
        .await;
}

fn raw_message(id: &str, thread: &str, rfc822: &str) -> Value {
    json!({ "id": id, "threadId": thread, "raw": BASE64_URL_SAFE.encode(rfc822) })
}

#[tokio::test]
async fn fetch_lists_unread_and_parses_raw_messages() {
    let f = setup().await;
    mount_token(&f.server).await;

    Mock::given(method("GET"))
        .and(path(format!("{API}/messages")))
        .and(query_param("maxResults", "10"))
        .and(header("authorization", "Bearer ya29.test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [
                { "id": "m2", "threadId": "t2" },
                { "id": "m1", "threadId": "t1" },
                { "id": "m3", "threadId": "t3" }
            ]
        })))
        .mount(&f.server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/messages/m1")))
        .and(query_param("format", "raw"))
        .respond_with(ResponseTemplate::new(200).set_body_json(raw_message("m1", "t1", OLDER)))
        .mount(&f.server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/messages/m2")))
        .respond_with(ResponseTemplate::new(200).set_body_json(raw_message("m2", "t2", NEWER)))
        .mount(&f.server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/messages/m3")))
        .respond_with(ResponseTemplate::new(500))
        .mount(&f.server)
        .await;

    let messages = f.mailbox.fetch_unread(&HashSet::new()).await.unwrap();

    // m3 failed and is skipped; the rest come back oldest first.
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].id, "m1");
    assert_eq!(messages[0].thread_id, "t1");
    assert_eq!(messages[0].sender, "alice@example.org");
    assert_eq!(messages[0].subject, "Opening hours");
    assert_eq!(messages[1].id, "m2");
}

#[tokio::test]
async fn handled_ids_are_paged_past_without_fetching_bodies() {
    let f = setup().await;
    mount_token(&f.server).await;

    Mock::given(method("GET"))
        .and(path(format!("{API}/messages")))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [{ "id": "m2", "threadId": "t2" }],
            "nextPageToken": "page-2"
        })))
        .expect(1)
        .mount(&f.server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/messages")))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "messages": [{ "id": "m1", "threadId": "t1" }]
        })))
        .expect(1)
        .mount(&f.server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/messages/m2")))
        .respond_with(ResponseTemplate::new(200).set_body_json(raw_message("m2", "t2", NEWER)))
        .expect(0)
        .mount(&f.server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/messages/m1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(raw_message("m1", "t1", OLDER)))
        .expect(1)
        .mount(&f.server)
        .await;

    let handled: HashSet<String> = ["m2".to_string()].into();
    let messages = f.mailbox.fetch_unread(&handled).await.unwrap();

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "m1");
}

#[tokio::test]
async fn empty_inbox_returns_no_messages() {
    let f = setup().await;
    mount_token(&f.server).await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/messages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "resultSizeEstimate": 0 })))
        .mount(&f.server)
        .await;

    assert!(f.mailbox.fetch_unread(&HashSet::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn reply_is_sent_on_thread_and_original_marked_read() {
    let f = setup().await;
    mount_token(&f.server).await;

    Mock::given(method("GET"))
        .and(path(format!("{API}/messages")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "messages": [{ "id": "m1", "threadId": "t1" }] })),
        )
        .mount(&f.server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/messages/m1")))
        .respond_with(ResponseTemplate::new(200).set_body_json(raw_message("m1", "t1", OLDER)))
        .mount(&f.server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{API}/messages/send")))
        .and(body_partial_json(json!({ "threadId": "t1" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "sent-1" })))
        .expect(1)
        .mount(&f.server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{API}/messages/m1/modify")))
        .and(body_json(json!({ "removeLabelIds": ["UNREAD"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "m1" })))
        .expect(1)
        .mount(&f.server)
        .await;

    let original = f.mailbox.fetch_unread(&HashSet::new()).await.unwrap().remove(0);
    f.mailbox
        .send_reply(&original, "Yes, 10 to 4 on Saturdays.")
        .await
        .unwrap();
    f.mailbox.mark_handled(&original).await.unwrap();

    let requests = f.server.received_requests().await.unwrap();
    let send = requests
        .iter()
        .find(|r| r.url.path().ends_with("/messages/send"))
        .unwrap();
    let body: Value = serde_json::from_slice(&send.body).unwrap();
    let raw = BASE64_URL_SAFE
        .decode(body["raw"].as_str().unwrap())
        .unwrap();
    let text = String::from_utf8(raw).unwrap();
    assert!(text.contains("Subject: Re: Opening hours"));
    assert!(text.contains("In-Reply-To: <hours@example.org>"));
    assert!(text.contains("To: alice@example.org"));
    assert!(text.contains("Yes, 10 to 4 on Saturdays."));
}

#[tokio::test]
async fn rejected_refresh_token_is_an_auth_failure() {
    let f = setup().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({ "error": "invalid_grant" })))
        .mount(&f.server)
        .await;

    let err = f.mailbox.fetch_unread(&HashSet::new()).await.unwrap_err();
    assert!(err.is_auth_failure(), "{err}");
}

#[tokio::test]
async fn unavailable_token_endpoint_is_transient() {
    let f = setup().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&f.server)
        .await;

    let err = f.mailbox.fetch_unread(&HashSet::new()).await.unwrap_err();
    assert!(!err.is_auth_failure(), "{err}");
}

#[tokio::test]
async fn api_unauthorized_is_an_auth_failure() {
    let f = setup().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "access_token": "ya29.stale", "expires_in": 3600 })),
        )
        .mount(&f.server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/messages")))
        .respond_with(ResponseTemplate::new(401))
        .mount(&f.server)
        .await;

    let err = f.mailbox.fetch_unread(&HashSet::new()).await.unwrap_err();
    assert!(err.is_auth_failure(), "{err}");
}

#[tokio::test]
async fn access_token_is_cached_between_calls() {
    let f = setup().await;
    mount_token(&f.server).await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/messages")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(2)
        .mount(&f.server)
        .await;

    f.mailbox.fetch_unread(&HashSet::new()).await.unwrap();
    f.mailbox.fetch_unread(&HashSet::new()).await.unwrap();
    // mount_token expects exactly one grant; verified when the server drops.
}
