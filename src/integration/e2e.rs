//! End-to-end tests of the split pipeline and the HTTP surface

use axum::http::{header, StatusCode};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

use crate::config::SegmentConfig;
use crate::error::SplitError;
use crate::http::create_router;
use crate::http::handlers::ErrorBody;
use crate::integration::fixtures::{multipart_request, read_zip, FakeFfmpeg};
use crate::pipeline::orchestrator::{PipelineOutput, StreamReport};
use crate::pipeline::workspace::WorkspaceManager;
use crate::pipeline::{Pipeline, UploadHandle};
use crate::state::{ActiveJobs, AppState};

fn pipeline(fake: &FakeFfmpeg, temp: &Path) -> Pipeline {
    Pipeline::new(
        fake.transcoder(),
        WorkspaceManager::new(temp),
        SegmentConfig::default(),
    )
    .with_stream_timeout(Duration::from_secs(10))
}

/// Copy the fixture input into the temp root, the way an upload lands there
fn stage_upload(fake: &FakeFfmpeg, temp: &Path) -> UploadHandle {
    let bytes = fake.input_bytes();
    let path = temp.join(format!("upload-{}", uuid::Uuid::new_v4()));
    std::fs::write(&path, &bytes).unwrap();
    UploadHandle {
        path,
        size: bytes.len() as u64,
    }
}

fn entry_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).unwrap().count()
}

async fn drain(output: PipelineOutput) -> (Vec<u8>, StreamReport) {
    let bytes = axum::body::to_bytes(output.body, usize::MAX).await.unwrap();
    let report = output.completion.await.unwrap();
    (bytes.to_vec(), report)
}

/// Poll until `check` holds; cleanup behind the HTTP layer runs detached.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..250 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

#[tokio::test]
async fn test_missing_upload_touches_nothing() {
    let temp = tempfile::tempdir().unwrap();
    let fake = FakeFfmpeg::producing(1);
    let jobs = ActiveJobs::new();

    let result = pipeline(&fake, temp.path()).run(None, Some("120"), &jobs).await;

    assert!(matches!(result, Err(SplitError::MissingUpload)));
    assert_eq!(entry_count(temp.path()), 0);
    assert!(fake.recorded_args().is_empty());
}

#[tokio::test]
async fn test_segments_streamed_in_order() {
    let temp = tempfile::tempdir().unwrap();
    let fake = FakeFfmpeg::producing(3);
    let jobs = ActiveJobs::new();
    let upload = stage_upload(&fake, temp.path());

    let output = pipeline(&fake, temp.path())
        .run(Some(upload), None, &jobs)
        .await
        .unwrap();
    assert_eq!(output.segment_count, 3);
    assert_eq!(output.segment_seconds, 900);

    let (archive, report) = drain(output).await;
    let entries = read_zip(&archive);
    let names: Vec<&str> = entries.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, ["part_000.m4a", "part_001.m4a", "part_002.m4a"]);
    assert_eq!(entries[1].1, b"segment 1 payload\n");

    let summary = report.archive.unwrap();
    assert_eq!(summary.entries, 3);
    assert!(report.cleanup.is_clean());

    // Upload and workspace are both gone, and the job is unregistered
    assert_eq!(entry_count(temp.path()), 0);
    assert!(jobs.is_empty());
}

#[tokio::test]
async fn test_segment_length_is_clamped() {
    let temp = tempfile::tempdir().unwrap();
    let fake = FakeFfmpeg::producing(1);
    let jobs = ActiveJobs::new();
    let upload = stage_upload(&fake, temp.path());

    let output = pipeline(&fake, temp.path())
        .run(Some(upload), Some("10"), &jobs)
        .await
        .unwrap();
    assert_eq!(output.segment_seconds, 60);
    drain(output).await;

    let args = fake.recorded_args();
    let pos = args.iter().position(|a| a == "-segment_time").unwrap();
    assert_eq!(args[pos + 1], "60");
}

#[tokio::test]
async fn test_transcode_failure_reports_code_and_stderr() {
    let temp = tempfile::tempdir().unwrap();
    let fake = FakeFfmpeg::failing(3, "Invalid data found when processing input");
    let jobs = ActiveJobs::new();
    let upload = stage_upload(&fake, temp.path());

    let result = pipeline(&fake, temp.path())
        .run(Some(upload), None, &jobs)
        .await;

    match result {
        Err(SplitError::TranscodeFailed {
            exit_code,
            diagnostic,
        }) => {
            assert_eq!(exit_code, Some(3));
            assert_eq!(diagnostic, "Invalid data found when processing input\n");
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected a transcode failure"),
    }
    assert_eq!(entry_count(temp.path()), 0);
    assert!(jobs.is_empty());
}

#[tokio::test]
async fn test_no_segments_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let fake = FakeFfmpeg::producing(0);
    let jobs = ActiveJobs::new();
    let upload = stage_upload(&fake, temp.path());

    let result = pipeline(&fake, temp.path())
        .run(Some(upload), None, &jobs)
        .await;

    assert!(matches!(result, Err(SplitError::NoSegmentsProduced)));
    assert_eq!(entry_count(temp.path()), 0);
}

#[tokio::test]
async fn test_transcode_timeout_cleans_up() {
    let temp = tempfile::tempdir().unwrap();
    let fake = FakeFfmpeg::hanging();
    let jobs = ActiveJobs::new();
    let upload = stage_upload(&fake, temp.path());

    let pipeline = Pipeline::new(
        fake.transcoder().with_timeout(Duration::from_millis(300)),
        WorkspaceManager::new(temp.path()),
        SegmentConfig::default(),
    );
    let result = pipeline.run(Some(upload), None, &jobs).await;

    assert!(matches!(result, Err(SplitError::TranscodeTimeout { .. })));
    assert_eq!(entry_count(temp.path()), 0);
}

#[tokio::test]
async fn test_cancelled_request_cleans_up() {
    let temp = tempfile::tempdir().unwrap();
    let fake = FakeFfmpeg::hanging();
    let jobs = ActiveJobs::new();
    let upload = stage_upload(&fake, temp.path());
    let pipeline = pipeline(&fake, temp.path());

    // The client goes away while ffmpeg is still running
    let result = tokio::time::timeout(
        Duration::from_millis(300),
        pipeline.run(Some(upload), None, &jobs),
    )
    .await;
    assert!(result.is_err());

    assert!(eventually(|| entry_count(temp.path()) == 0).await);
    assert!(jobs.is_empty());
}

#[tokio::test]
async fn test_concurrent_requests_are_isolated() {
    let temp = tempfile::tempdir().unwrap();
    let jobs = ActiveJobs::new();

    let fakes: Vec<FakeFfmpeg> = (1..=4).map(FakeFfmpeg::producing).collect();
    let runs = fakes.iter().map(|fake| {
        let upload = stage_upload(fake, temp.path());
        let pipeline = pipeline(fake, temp.path());
        let jobs = jobs.clone();
        async move {
            let output = pipeline.run(Some(upload), None, &jobs).await.unwrap();
            let id = output.job_id;
            let (archive, _) = drain(output).await;
            (id, read_zip(&archive).len())
        }
    });
    let results = futures::future::join_all(runs).await;

    let mut ids: Vec<_> = results.iter().map(|(id, _)| *id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);

    let counts: Vec<usize> = results.iter().map(|(_, n)| *n).collect();
    assert_eq!(counts, [1, 2, 3, 4]);
    assert_eq!(entry_count(temp.path()), 0);
    assert!(jobs.is_empty());
}

#[tokio::test]
async fn test_http_split_returns_zip() {
    let temp = tempfile::tempdir().unwrap();
    let fake = FakeFfmpeg::producing(2);
    let state = Arc::new(AppState::new(fake.server_config(temp.path())));
    let app = create_router(state.clone());

    let request = multipart_request("/split?segmentSeconds=120", "file", &fake.input_bytes());
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"segments.zip\""
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let names: Vec<String> = read_zip(&bytes).into_iter().map(|(n, _)| n).collect();
    assert_eq!(names, ["part_000.m4a", "part_001.m4a"]);

    let args = fake.recorded_args();
    let pos = args.iter().position(|a| a == "-segment_time").unwrap();
    assert_eq!(args[pos + 1], "120");

    assert!(eventually(|| entry_count(temp.path()) == 0 && state.jobs.is_empty()).await);
}

#[tokio::test]
async fn test_http_repeated_segment_param_uses_first() {
    let temp = tempfile::tempdir().unwrap();
    let fake = FakeFfmpeg::producing(1);
    let state = Arc::new(AppState::new(fake.server_config(temp.path())));
    let app = create_router(state.clone());

    let request = multipart_request(
        "/split?segmentSeconds=120&segmentSeconds=30",
        "file",
        &fake.input_bytes(),
    );
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let args = fake.recorded_args();
    let pos = args.iter().position(|a| a == "-segment_time").unwrap();
    assert_eq!(args[pos + 1], "120");

    assert!(eventually(|| entry_count(temp.path()) == 0 && state.jobs.is_empty()).await);
}

#[tokio::test]
async fn test_http_transcode_failure_is_json_500() {
    let temp = tempfile::tempdir().unwrap();
    let fake = FakeFfmpeg::failing(1, "moov atom not found");
    let app = create_router(Arc::new(AppState::new(fake.server_config(temp.path()))));

    let request = multipart_request("/split", "file", &fake.input_bytes());
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: ErrorBody = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body.error, "ffmpeg failed: 1\nmoov atom not found\n");
    assert_eq!(entry_count(temp.path()), 0);
}

#[tokio::test]
async fn test_http_debug_jobs_lists_nothing_when_idle() {
    let temp = tempfile::tempdir().unwrap();
    let fake = FakeFfmpeg::producing(1);
    let app = create_router(Arc::new(AppState::new(fake.server_config(temp.path()))));

    let request = axum::http::Request::get("/debug/jobs")
        .body(axum::body::Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(value["count"], 0);
}
