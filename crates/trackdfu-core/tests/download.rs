//! Download phase against a local HTTP server.

mod common;

use std::sync::Arc;

use common::*;
use trackdfu_core::transport::MockTransport;
use trackdfu_core::{FetchError, HttpSource, PackageSource, UpdateError, UpdateSession, UpdateState};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FILENAME: &str = "/firmware/mc4seb/mc4seb-2-ab87abb.zip";

#[tokio::test]
async fn test_fetch_package() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FILENAME))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(app_only_package()))
        .mount(&server)
        .await;

    let source = HttpSource::new(Some(server.uri())).unwrap();
    let bytes = source.fetch(FILENAME).await.unwrap();
    assert_eq!(bytes, app_only_package());
}

#[tokio::test]
async fn test_fetch_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let source = HttpSource::new(Some(server.uri())).unwrap();
    assert_eq!(
        source.fetch(FILENAME).await,
        Err(FetchError::Status {
            status: 503,
            reason: "Service Unavailable".to_string()
        })
    );
}

#[tokio::test]
async fn test_network_error() {
    // Nothing listens on the discard port.
    let source = HttpSource::new(Some("http://127.0.0.1:9".to_string())).unwrap();
    assert!(matches!(
        source.fetch(FILENAME).await,
        Err(FetchError::Network(_))
    ));
}

#[tokio::test]
async fn test_update_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(FILENAME))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(base_and_app_package()))
        .expect(1)
        .mount(&server)
        .await;

    let mock = Arc::new(MockTransport::new());
    mock.queue_no_device();
    mock.queue_device("HaritoraX2-Update");

    let source = HttpSource::new(Some(server.uri())).unwrap();
    let session = UpdateSession::new(mock.clone(), Arc::new(source), &config());
    let recorder = Recorder::attach(&session);

    session.update_firmware(&release(FILENAME)).await.unwrap();
    assert_eq!(recorder.count_state(UpdateState::Complete), 1);
    assert_eq!(mock.updates().len(), 2);
}

#[tokio::test]
async fn test_update_404() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let mock = Arc::new(MockTransport::new());
    mock.queue_device("HaritoraX2-Update");

    let source = HttpSource::new(Some(server.uri())).unwrap();
    let session = UpdateSession::new(mock.clone(), Arc::new(source), &config());
    let recorder = Recorder::attach(&session);

    let err = session.update_firmware(&release(FILENAME)).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Failed to download firmware: HTTP 404: Not Found"
    );
    assert!(matches!(err, UpdateError::Download { status: 404, .. }));
    assert!(recorder.progress().is_empty());
    assert!(mock.updates().is_empty());
    assert_eq!(
        recorder.logs(),
        vec!["Update failed: Failed to download firmware: HTTP 404: Not Found".to_string()]
    );
}
