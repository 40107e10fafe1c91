mod common;

use bridge_traits::error::BridgeError;
use bridge_traits::http::HttpResponse;
use bytes::Bytes;
use common::{connect, json_reply, stream_reply, FakeGraph, RecordingListener};
use provider_onedrive::{ApiRequest, DriveError, NoProgress};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct UploadedItem {
    id: String,
    size: u64,
}

fn chunks(parts: &[&'static str]) -> Vec<std::io::Result<Bytes>> {
    parts.iter().map(|p| Ok(Bytes::from_static(p.as_bytes()))).collect()
}

#[test]
fn test_download_streams_to_destination() {
    let http = Arc::new(FakeGraph::streaming(|request, _| {
        assert_eq!(request.header_value("Accept-Encoding"), None);
        Ok(stream_reply(200, chunks(&["hello ", "drive ", "world"])))
    }));
    let connection = connect(http.clone());
    let dir = tempfile::tempdir().unwrap();
    let destination = dir.path().join("nested/downloads");
    let listener = Arc::new(RecordingListener::default());

    let path = connection
        .download(
            ApiRequest::get("/me/drive/items/1/content"),
            &destination,
            "greeting.txt",
            Some(17),
            listener.clone(),
        )
        .unwrap();

    assert_eq!(path, destination.join("greeting.txt"));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello drive world");
    assert!(!destination.join("greeting.txt.part").exists());

    assert_eq!(
        listener.updates(),
        vec![(6, Some(17)), (12, Some(17)), (17, Some(17))]
    );
    assert_eq!(listener.completed(), vec![17]);
    assert!(listener.failures().is_empty());
}

#[test]
fn test_download_retries_connection_failures() {
    let http = Arc::new(FakeGraph::streaming(|_, index| match index {
        0 => Err(BridgeError::ConnectionFailed("reset".to_string())),
        1 => Ok(stream_reply(503, chunks(&["busy"]))),
        _ => Ok(stream_reply(200, chunks(&["abc"]))),
    }));
    let connection = connect(http.clone());
    let dir = tempfile::tempdir().unwrap();
    let listener = Arc::new(RecordingListener::default());

    let path = connection
        .download(
            ApiRequest::get("/me/drive/items/1/content"),
            dir.path(),
            "abc.bin",
            None,
            listener.clone(),
        )
        .unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    assert_eq!(http.calls(), 3);
    assert_eq!(listener.updates(), vec![(3, Some(3))]);
    assert_eq!(listener.completed(), vec![3]);
}

#[test]
fn test_interrupted_download_removes_partial_file() {
    let http = Arc::new(FakeGraph::streaming(|_, _| {
        let mut parts = chunks(&["first-half"]);
        parts.push(Err(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "peer went away",
        )));
        Ok(stream_reply(200, parts))
    }));
    let connection = connect(http.clone());
    let dir = tempfile::tempdir().unwrap();
    let listener = Arc::new(RecordingListener::default());

    let result = connection.download(
        ApiRequest::get("/me/drive/items/1/content"),
        dir.path(),
        "broken.bin",
        None,
        listener.clone(),
    );

    assert!(matches!(result, Err(DriveError::Response { .. })));
    assert_eq!(http.calls(), 1);
    assert!(!dir.path().join("broken.bin").exists());
    assert!(!dir.path().join("broken.bin.part").exists());
    assert_eq!(listener.failures().len(), 1);
    assert!(listener.completed().is_empty());
}

#[test]
fn test_download_size_mismatch_fails() {
    let http = Arc::new(FakeGraph::streaming(|_, _| {
        Ok(stream_reply(200, chunks(&["short"])))
    }));
    let connection = connect(http);
    let dir = tempfile::tempdir().unwrap();
    let listener = Arc::new(RecordingListener::default());

    let result = connection.download(
        ApiRequest::get("/me/drive/items/1/content"),
        dir.path(),
        "file.bin",
        Some(100),
        listener.clone(),
    );

    assert!(matches!(result, Err(DriveError::Response { .. })));
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    assert_eq!(listener.failures().len(), 1);
}

#[test]
fn test_download_not_found_reports_failure_once() {
    let http = Arc::new(FakeGraph::streaming(|_, _| {
        Ok(stream_reply(
            404,
            chunks(&[r#"{"error":{"code":"itemNotFound","message":"gone"}}"#]),
        ))
    }));
    let connection = connect(http.clone());
    let dir = tempfile::tempdir().unwrap();
    let listener = Arc::new(RecordingListener::default());

    let result = connection.download(
        ApiRequest::get("/me/drive/items/404/content"),
        dir.path(),
        "missing.bin",
        None,
        listener.clone(),
    );

    match result {
        Err(error) => assert_eq!(error.graph_code(), Some("itemNotFound")),
        Ok(path) => panic!("unexpected success: {:?}", path),
    }
    assert_eq!(http.calls(), 1);
    assert_eq!(listener.failures().len(), 1);
    assert!(listener.updates().is_empty());
}

#[test]
fn test_download_rejects_path_in_name() {
    let http = Arc::new(FakeGraph::streaming(|_, _| Ok(stream_reply(200, chunks(&["x"])))));
    let connection = connect(http.clone());
    let dir = tempfile::tempdir().unwrap();

    let result = connection.download(
        ApiRequest::get("/me/drive/items/1/content"),
        dir.path(),
        "../escape.txt",
        None,
        Arc::new(NoProgress),
    );

    assert!(matches!(result, Err(DriveError::InvalidRequest(_))));
    assert_eq!(http.calls(), 0);
}

#[test]
fn test_download_async() {
    let http = Arc::new(FakeGraph::streaming(|_, _| {
        Ok(stream_reply(200, chunks(&["pooled"])))
    }));
    let connection = connect(http);
    let dir = tempfile::tempdir().unwrap();
    let listener = Arc::new(RecordingListener::default());

    let task = connection.download_async(
        ApiRequest::get("/me/drive/items/1/content"),
        dir.path().to_path_buf(),
        "pooled.txt".to_string(),
        None,
        listener.clone(),
    );
    let path = futures::executor::block_on(task).unwrap();

    assert_eq!(std::fs::read_to_string(path).unwrap(), "pooled");
    assert_eq!(listener.completed(), vec![6]);
}

#[test]
fn test_cancelled_download_reports_failure() {
    let http = Arc::new(
        FakeGraph::streaming(|_, _| Ok(stream_reply(200, chunks(&["late"]))))
            .with_delay(Duration::from_secs(30)),
    );
    let connection = connect(http);
    let dir = tempfile::tempdir().unwrap();
    let listener = Arc::new(RecordingListener::default());

    let task = connection.download_async(
        ApiRequest::get("/me/drive/items/1/content"),
        dir.path().to_path_buf(),
        "late.txt".to_string(),
        None,
        listener.clone(),
    );
    task.cancel();

    assert!(matches!(
        futures::executor::block_on(task),
        Err(DriveError::Task(_))
    ));
    assert_eq!(listener.failures().len(), 1);
    assert!(!dir.path().join("late.txt").exists());
}

#[test]
fn test_upload_streams_file_and_parses_item() {
    let http = Arc::new(FakeGraph::new(|request, _| {
        assert_eq!(request.header_value("Content-Type"), Some("text/plain"));
        Ok(json_reply(201, serde_json::json!({ "id": "new-item", "size": 11 })))
    }));
    let connection = connect(http.clone());
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("notes.txt");
    std::fs::write(&source, b"hello world").unwrap();
    let listener = Arc::new(RecordingListener::default());

    let item: UploadedItem = connection
        .upload(
            ApiRequest::put("/me/drive/root:/notes.txt:/content"),
            &source,
            listener.clone(),
        )
        .unwrap();

    assert_eq!(item.id, "new-item");
    assert_eq!(item.size, 11);
    assert_eq!(http.uploads(), vec![(b"hello world".to_vec(), 11)]);
    listener.assert_monotonic_to(11);
    assert!(listener.updates().iter().all(|u| u.1 == Some(11)));
    assert_eq!(listener.completed(), vec![11]);
}

#[test]
fn test_upload_retry_keeps_progress_monotonic() {
    let http = Arc::new(FakeGraph::new(|_, index| match index {
        0 => Ok(HttpResponse::new(500, "")),
        _ => Ok(json_reply(200, serde_json::json!({ "id": "x", "size": 4 }))),
    }));
    let connection = connect(http.clone());
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("data.bin");
    std::fs::write(&source, b"data").unwrap();
    let listener = Arc::new(RecordingListener::default());

    let item: UploadedItem = connection
        .upload(ApiRequest::put("/me/drive/items/1/content"), &source, listener.clone())
        .unwrap();

    assert_eq!(item.id, "x");
    assert_eq!(http.uploads().len(), 2);
    listener.assert_monotonic_to(4);
    assert_eq!(listener.completed(), vec![4]);
}

#[test]
fn test_upload_rejects_unusable_sources_before_sending() {
    let http = Arc::new(FakeGraph::new(|_, _| {
        Ok(json_reply(200, serde_json::json!({ "id": "x", "size": 1 })))
    }));
    let connection = connect(http.clone());
    let dir = tempfile::tempdir().unwrap();
    let empty = dir.path().join("empty.txt");
    std::fs::write(&empty, b"").unwrap();

    let sources = [
        dir.path().join("missing.txt"),
        empty,
        dir.path().to_path_buf(),
    ];

    for source in sources {
        let listener = Arc::new(RecordingListener::default());
        let result = connection.upload::<UploadedItem>(
            ApiRequest::put("/me/drive/root:/x:/content"),
            &source,
            listener.clone(),
        );

        match result {
            Err(DriveError::TransferIo { path, .. }) => assert_eq!(path, source),
            other => panic!("unexpected result for {:?}: {:?}", source, other),
        }
        assert_eq!(listener.failures().len(), 1);
    }
    assert_eq!(http.calls(), 0);
}

#[test]
fn test_upload_rejection_is_a_request_error() {
    let http = Arc::new(FakeGraph::new(|_, _| {
        Ok(HttpResponse::new(
            409,
            r#"{"error":{"code":"nameAlreadyExists","message":"exists"}}"#,
        ))
    }));
    let connection = connect(http.clone());
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("photo.jpg");
    std::fs::write(&source, b"jpeg").unwrap();
    let listener = Arc::new(RecordingListener::default());

    let result = connection.upload::<UploadedItem>(
        ApiRequest::put("/me/drive/root:/photo.jpg:/content"),
        &source,
        listener.clone(),
    );

    assert!(matches!(result, Err(DriveError::Request { status: 409, .. })));
    assert_eq!(http.calls(), 1);
    assert_eq!(
        http.requests()[0].header_value("Content-Type"),
        Some("image/jpeg")
    );
    assert_eq!(listener.failures().len(), 1);
    assert!(listener.completed().is_empty());
}

#[test]
fn test_upload_async() {
    let http = Arc::new(FakeGraph::new(|_, _| {
        Ok(json_reply(200, serde_json::json!({ "id": "async", "size": 3 })))
    }));
    let connection = connect(http);
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("abc.txt");
    std::fs::write(&source, b"abc").unwrap();
    let listener = Arc::new(RecordingListener::default());

    let task = connection.upload_async::<UploadedItem>(
        ApiRequest::put("/me/drive/root:/abc.txt:/content"),
        source,
        listener.clone(),
    );
    let item = futures::executor::block_on(task).unwrap();

    assert_eq!(item.id, "async");
    assert_eq!(listener.completed(), vec![3]);
}
