//! Office 365 adapter against a mocked Microsoft Graph

use chrono::NaiveDate;
use mailvault_core::domain::{FilterSpec, PageToken};
use mailvault_core::ports::{IMailboxProvider, ProviderError};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{self, ACCESS_TOKEN};

#[tokio::test]
async fn test_list_pages_through_next_link() {
    let (server, provider) = common::setup_office365().await;

    Mock::given(method("GET"))
        .and(path("/me/messages"))
        .and(query_param("$top", "100"))
        .and(query_param(
            "$filter",
            "receivedDateTime ge 2023-09-01T00:00:00Z",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [
                {"id": "AAMk-1", "receivedDateTime": "2023-09-02T08:00:00Z", "parentFolderId": "inbox"},
                {"id": "AAMk-2", "receivedDateTime": "2023-09-03T08:00:00Z", "parentFolderId": "inbox"}
            ],
            "@odata.nextLink": format!("{}/me/messages/page2?$skip=2", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/me/messages/page2"))
        .and(query_param("$skip", "2"))
        .and(header("authorization", "Bearer test-access-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [{"id": "AAMk-3"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let filter = FilterSpec::new(None, NaiveDate::from_ymd_opt(2023, 9, 1), None).unwrap();

    let first = provider.list_page(ACCESS_TOKEN, &filter, None).await.unwrap();
    assert_eq!(first.messages.len(), 2);
    assert_eq!(first.messages[0].metadata().folder.as_deref(), Some("inbox"));
    let next = first.next_page.expect("expected a next page");

    let second = provider
        .list_page(ACCESS_TOKEN, &filter, Some(&next))
        .await
        .unwrap();
    assert_eq!(second.messages.len(), 1);
    assert_eq!(second.messages[0].id().as_str(), "AAMk-3");
    assert!(second.next_page.is_none());
}

#[tokio::test]
async fn test_foreign_next_link_is_rejected() {
    let (_server, provider) = common::setup_office365().await;

    let token = PageToken::new("https://evil.example.com/steal?token=1").unwrap();
    let err = provider
        .list_page(ACCESS_TOKEN, &FilterSpec::all(), Some(&token))
        .await
        .unwrap_err();
    assert!(matches!(err, ProviderError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_fetch_returns_mime_source() {
    let (server, provider) = common::setup_office365().await;
    let mime = "Subject: Quarterly report\r\n\r\nSee attached.\r\n";

    Mock::given(method("GET"))
        .and(path("/me/messages/AAMk-1/$value"))
        .respond_with(ResponseTemplate::new(200).set_body_string(mime))
        .expect(1)
        .mount(&server)
        .await;

    let bytes = provider
        .fetch_message(ACCESS_TOKEN, &common::message("AAMk-1"))
        .await
        .unwrap();
    assert_eq!(bytes, mime.as_bytes());
}

#[tokio::test]
async fn test_forbidden_is_not_transient() {
    let (server, provider) = common::setup_office365().await;

    Mock::given(method("GET"))
        .and(path("/me/messages"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": {"code": "ErrorAccessDenied", "message": "Access is denied."}
        })))
        .mount(&server)
        .await;

    let err = provider
        .list_page(ACCESS_TOKEN, &FilterSpec::all(), None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), 403);
    assert!(!err.is_transient());
}
