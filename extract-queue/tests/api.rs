//! HTTP routes via `tower::ServiceExt::oneshot`.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::Value;
use tower::ServiceExt;

use common::Harness;
use extract_queue::api::{ApiServer, ApiServerConfig, AppState};

const BOUNDARY: &str = "extract-queue-test-boundary";

fn router(h: &Harness) -> Router {
    let config = ApiServerConfig {
        version: extract_queue::api::models::VersionInfo {
            version: Some("1.2.0".into()),
            git_hash: Some("abc123".into()),
        },
        ..ApiServerConfig::default()
    };
    ApiServer::new(config, AppState::new(h.jobs.clone())).build_router()
}

/// Hand-built `multipart/form-data` body.
fn multipart(file: Option<(&str, &[u8])>, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((file_name, content)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"pdf\"; filename=\"{file_name}\"\r\nContent-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn submit_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/extract/process")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_submit_returns_job_endpoints() {
    let h = Harness::new().await;
    let app = router(&h);

    let response = app
        .clone()
        .oneshot(submit_request(multipart(
            Some(("doc1.pdf", &b"%PDF-1.7 A"[..])),
            &[("compress_images", "false")],
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body = json_body(response).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    assert_eq!(body["message"], "PDF processing in background");
    assert_eq!(
        body["status_endpoint"],
        format!("/extract/process/{job_id}/status")
    );
    assert_eq!(
        body["result_endpoint"],
        format!("/extract/process/{job_id}/result")
    );

    let descriptor = h.queue.try_pop().unwrap();
    assert_eq!(descriptor.job_id, job_id);
    assert!(!descriptor.options.compress_images);

    // Resubmission of the same bytes is a cache hit.
    let response = app
        .oneshot(submit_request(multipart(
            Some(("copy.pdf", &b"%PDF-1.7 A"[..])),
            &[],
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = json_body(response).await;
    assert_eq!(body["job_id"], job_id.as_str());
    assert_eq!(body["message"], "Existing PDF processing job found");
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_submit_without_file_is_bad_request() {
    let h = Harness::new().await;

    let response = router(&h)
        .oneshot(submit_request(multipart(None, &[("use_cache", "true")])))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn test_submit_with_bad_flag_is_bad_request() {
    let h = Harness::new().await;

    let response = router(&h)
        .oneshot(submit_request(multipart(
            Some(("doc1.pdf", &b"A"[..])),
            &[("use_cache", "sometimes")],
        )))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_status_and_result_lifecycle() {
    let h = Harness::new().await;
    let app = router(&h);
    let outcome = h
        .jobs
        .submit(&b"A"[..], "doc1.pdf", Default::default())
        .await
        .unwrap();
    let job_id = outcome.job_id;

    let response = app
        .clone()
        .oneshot(get(&format!("/extract/process/{job_id}/status")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = json_body(response).await;
    assert_eq!(status["job_started"], false);
    assert_eq!(status["job_completed"], false);
    assert!(status["time_processing"].is_null());

    let response = app
        .clone()
        .oneshot(get(&format!("/extract/process/{job_id}/result")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "NOT_READY");

    // Finish the job by hand and drop an archive where the pipeline would.
    let job = h.repository.get_job(&job_id).await.unwrap();
    h.repository
        .mark_started(&job_id, &job.output_dir)
        .await
        .unwrap();
    h.repository.mark_completed(&job_id).await.unwrap();
    tokio::fs::write(job.archive_path(), b"PK\x05\x06zip")
        .await
        .unwrap();

    let response = app
        .oneshot(get(&format!("/extract/process/{job_id}/result")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let disposition = response
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(disposition, "attachment; filename=\"doc1_output.zip\"");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"PK\x05\x06zip");
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let h = Harness::new().await;
    let app = router(&h);

    for uri in [
        "/extract/process/missing/status",
        "/extract/process/missing/result",
    ] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn test_health_and_version() {
    let h = Harness::new().await;
    let app = router(&h);
    h.jobs
        .submit(&b"A"[..], "doc1.pdf", Default::default())
        .await
        .unwrap();

    let response = app.clone().oneshot(get("/extract/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let health = json_body(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["queue_depth"], 1);

    let response = app.oneshot(get("/extract/version_info")).await.unwrap();
    let version = json_body(response).await;
    assert_eq!(version["version"], "1.2.0");
    assert_eq!(version["git_hash"], "abc123");
}
