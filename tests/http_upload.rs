use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chunk_upload::models::FileHandle;
use chunk_upload::observer::NoopObserver;
use chunk_upload::transport::{HttpTransport, Transport, UploadBody, UploadRequest};
use chunk_upload::{FileCandidate, TransferError, UploadConfig, UploadOrchestrator, UploadStatus};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Minimal HTTP/1.1 endpoint: answers every request with `status` and `body`
/// and forwards the raw request text.
async fn serve(
    status: &'static str,
    body: &'static str,
) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/upload", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                let request = read_request(&mut socket).await;
                tx.send(request).ok();
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.ok();
                socket.shutdown().await.ok();
            });
        }
    });

    (url, rx)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = socket.read(&mut buf).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&data).to_string();
        let Some(header_end) = text.find("\r\n\r\n") else {
            continue;
        };
        let head = text[..header_end].to_ascii_lowercase();
        let body_len = data.len() - (header_end + 4);

        let content_length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok());
        match content_length {
            Some(len) if body_len >= len => break,
            Some(_) => continue,
            None if head.contains("transfer-encoding: chunked") => {
                if text.ends_with("0\r\n\r\n") {
                    break;
                }
            }
            None => break,
        }
    }

    String::from_utf8_lossy(&data).to_string()
}

#[tokio::test]
async fn chunk_request_carries_multipart_fields_and_headers() {
    let (url, mut requests) =
        serve("200 OK", r#"{"url":"https://cdn.test/f1","chunkIndex":1}"#).await;
    let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();

    let request = UploadRequest {
        url,
        headers: HashMap::from([("X-Token".to_string(), "abc".to_string())]),
        body: UploadBody::Chunk {
            file_id: "f1".into(),
            chunk_index: 1,
            total_chunks: 3,
            data: Bytes::from_static(b"chunk-bytes"),
        },
    };
    let response = transport.send(&request).await.unwrap();
    assert_eq!(response["url"], "https://cdn.test/f1");

    let raw = requests.recv().await.unwrap();
    let lower = raw.to_ascii_lowercase();
    assert!(raw.starts_with("POST /upload"));
    assert!(lower.contains("x-token: abc"));
    assert!(lower.contains("content-type: multipart/form-data"));
    assert!(raw.contains(r#"name="file"; filename="blob""#));
    assert!(raw.contains("chunk-bytes"));
    assert!(raw.contains("name=\"fileId\"\r\n\r\nf1\r\n"));
    assert!(raw.contains("name=\"chunkIndex\"\r\n\r\n1\r\n"));
    assert!(raw.contains("name=\"totalChunks\"\r\n\r\n3\r\n"));
}

#[tokio::test]
async fn non_success_status_is_reported() {
    let (url, _requests) = serve("503 Service Unavailable", "{}").await;
    let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();

    let request = UploadRequest {
        url,
        headers: HashMap::new(),
        body: UploadBody::File {
            file_name: "a.txt".into(),
            mime_type: "text/plain".into(),
            source: FileHandle::Memory(Bytes::from_static(b"hello")),
            size: 5,
        },
    };
    let err = transport.send(&request).await.unwrap_err();

    assert!(matches!(err, TransferError::Status { status: 503, .. }));
    assert_eq!(err.to_string(), "Upload failed: 503 Service Unavailable");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn non_json_body_is_an_invalid_response() {
    let (url, _requests) = serve("200 OK", "not json").await;
    let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();

    let request = UploadRequest {
        url,
        headers: HashMap::new(),
        body: UploadBody::File {
            file_name: "a.txt".into(),
            mime_type: String::new(),
            source: FileHandle::Memory(Bytes::from_static(b"hello")),
            size: 5,
        },
    };
    let err = transport.send(&request).await.unwrap_err();
    assert!(matches!(err, TransferError::InvalidResponse(_)));
}

#[tokio::test]
async fn file_on_disk_is_streamed_into_the_form() {
    let (url, mut requests) = serve("200 OK", r#"{"url":"https://cdn.test/notes.txt"}"#).await;
    let transport = HttpTransport::new(Duration::from_secs(5)).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    tokio::fs::write(&path, b"streamed from disk").await.unwrap();

    let request = UploadRequest {
        url,
        headers: HashMap::new(),
        body: UploadBody::File {
            file_name: "notes.txt".into(),
            mime_type: "text/plain".into(),
            source: FileHandle::Path(path),
            size: 18,
        },
    };
    let response = transport.send(&request).await.unwrap();
    assert_eq!(response["url"], "https://cdn.test/notes.txt");

    let raw = requests.recv().await.unwrap();
    assert!(raw.contains(r#"name="file"; filename="notes.txt""#));
    assert!(raw.to_ascii_lowercase().contains("content-type: text/plain"));
    assert!(raw.contains("streamed from disk"));
}

#[tokio::test]
async fn orchestrator_uploads_over_http() {
    let (url, mut requests) = serve("200 OK", r#"{"url":"https://cdn.test/a.png"}"#).await;

    let mut config = UploadConfig::new(url);
    config.headers.insert("Authorization".into(), "Bearer t".into());
    let transport = HttpTransport::new(config.request_timeout()).unwrap();
    let mut orchestrator =
        UploadOrchestrator::new(config, Arc::new(transport), Box::new(NoopObserver)).unwrap();

    let candidate = FileCandidate::from_bytes("a.png", "image/png", 0, b"png-data".to_vec());
    let id = orchestrator.add_files(vec![candidate]).added[0].clone();
    orchestrator.start_all().await;
    orchestrator.run_until_idle().await;

    let file = orchestrator.file(&id).unwrap();
    assert_eq!(file.status, UploadStatus::Success);
    assert_eq!(file.remote_url.as_deref(), Some("https://cdn.test/a.png"));

    let raw = requests.recv().await.unwrap();
    assert!(raw.to_ascii_lowercase().contains("authorization: bearer t"));
    assert!(raw.contains(r#"name="file"; filename="a.png""#));
    assert!(raw.contains("png-data"));
}
