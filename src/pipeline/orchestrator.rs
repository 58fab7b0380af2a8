//! Split pipeline
//!
//! Drives one request through validate → transcode → discover → stream →
//! cleanup. Everything up to discovery happens before the response exists,
//! so failures there become ordinary error responses. Once the archive body
//! is handed out, failures can only abort the stream.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::archive::{spawn_archive, ArchiveHandle, ArchiveSummary};
use super::discovery::{discover, SegmentFile};
use super::planner::SegmentRequestParams;
use super::transcode::SegmentTranscoder;
use super::workspace::{CleanupReport, ScratchGuard, Workspace, WorkspaceManager};
use super::UploadHandle;
use crate::config::{SegmentConfig, ServerConfig};
use crate::error::{Result, SplitError};
use crate::state::{ActiveJobs, JobGuard};

/// Filename offered to the client
pub const ARCHIVE_FILENAME: &str = "segments.zip";

/// The split pipeline, shared by all requests
#[derive(Debug, Clone)]
pub struct Pipeline {
    transcoder: SegmentTranscoder,
    workspaces: WorkspaceManager,
    segment: SegmentConfig,
    stream_timeout: Option<Duration>,
    channel_capacity: usize,
}

/// A successful pipeline run whose archive is still being streamed
pub struct PipelineOutput {
    pub job_id: Uuid,
    pub segment_seconds: u32,
    pub segment_count: usize,
    /// Streaming archive body
    pub body: Body,
    /// Resolves once the stream ended and the workspace was cleaned up
    pub completion: JoinHandle<StreamReport>,
}

/// How a streamed archive ended
#[derive(Debug)]
pub struct StreamReport {
    pub archive: Result<ArchiveSummary>,
    pub cleanup: CleanupReport,
}

impl IntoResponse for PipelineOutput {
    fn into_response(self) -> Response {
        let disposition = format!("attachment; filename=\"{}\"", ARCHIVE_FILENAME);
        let mut response = Response::new(self.body);
        *response.status_mut() = StatusCode::OK;
        let headers = response.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/zip"),
        );
        if let Ok(value) = HeaderValue::from_str(&disposition) {
            headers.insert(header::CONTENT_DISPOSITION, value);
        }
        response
    }
}

impl Pipeline {
    pub fn new(
        transcoder: SegmentTranscoder,
        workspaces: WorkspaceManager,
        segment: SegmentConfig,
    ) -> Self {
        Self {
            transcoder,
            workspaces,
            segment,
            stream_timeout: None,
            channel_capacity: 8,
        }
    }

    /// Build the pipeline described by the server configuration
    pub fn from_config(config: &ServerConfig) -> Self {
        let transcoder = SegmentTranscoder::new(&config.ffmpeg_path, config.audio.clone())
            .with_timeout(config.limits.transcode_timeout())
            .with_diagnostic_limit(config.limits.diagnostic_limit_bytes);
        Self::new(
            transcoder,
            WorkspaceManager::new(&config.temp_dir),
            config.segment.clone(),
        )
        .with_stream_timeout(config.limits.stream_timeout())
        .with_channel_capacity(config.limits.archive_channel_capacity)
    }

    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = Some(timeout);
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn transcoder(&self) -> &SegmentTranscoder {
        &self.transcoder
    }

    /// Run the pipeline for one request.
    ///
    /// Returns `MissingUpload` without touching the filesystem when there is
    /// no upload. Any other error is returned only after the workspace and
    /// the upload were removed. On success the archive is streamed by the
    /// returned body, and cleanup runs once that stream has ended. If the
    /// returned future is dropped early, cleanup runs in the background.
    pub async fn run(
        &self,
        upload: Option<UploadHandle>,
        raw_segment_seconds: Option<&str>,
        jobs: &ActiveJobs,
    ) -> Result<PipelineOutput> {
        let upload = upload.ok_or(SplitError::MissingUpload)?;
        let params = SegmentRequestParams::from_raw(raw_segment_seconds, &self.segment);

        let mut scratch = ScratchGuard::new(self.workspaces.clone(), vec![upload.path.clone()]);
        let workspace = match self.workspaces.create().await {
            Ok(ws) => ws,
            Err(e) => {
                error!("Failed to create workspace: {}", e);
                scratch.release().await;
                return Err(SplitError::Workspace(e));
            }
        };
        scratch.attach(workspace.clone());
        let job = jobs.register(&workspace, params.segment_seconds);
        let job_id = workspace.id;

        info!(
            "Job {}: splitting {} ({} bytes) into {}s segments",
            job_id,
            upload.path.display(),
            upload.size,
            params.segment_seconds
        );

        let segments = match self.produce_segments(&upload, &workspace, params).await {
            Ok(segments) => segments,
            Err(e) => {
                warn!("Job {} failed: {}", job_id, e);
                scratch.release().await;
                return Err(e);
            }
        };

        let segment_count = segments.len();
        info!(
            "Job {}: streaming {} segment(s) as {}",
            job_id, segment_count, ARCHIVE_FILENAME
        );

        let (body, handle) = spawn_archive(segments, self.channel_capacity);
        let completion = tokio::spawn(
            finish_stream(handle, self.stream_timeout, scratch, job)
                .instrument(info_span!("job", id = %job_id)),
        );

        Ok(PipelineOutput {
            job_id,
            segment_seconds: params.segment_seconds,
            segment_count,
            body,
            completion,
        })
    }

    /// Transcode into the workspace and collect the produced segments.
    async fn produce_segments(
        &self,
        upload: &UploadHandle,
        workspace: &Workspace,
        params: SegmentRequestParams,
    ) -> Result<Vec<SegmentFile>> {
        self.transcoder
            .invoke(&upload.path, &workspace.path, params.segment_seconds)
            .await?
            .into_result()?;

        let dir = workspace.path.clone();
        let segments = tokio::task::spawn_blocking(move || discover(&dir))
            .await
            .map_err(|e| SplitError::Io(std::io::Error::other(e.to_string())))?;

        if segments.is_empty() {
            return Err(SplitError::NoSegmentsProduced);
        }
        Ok(segments)
    }
}

/// Wait for the archive stream to end, then reclaim the workspace and upload.
///
/// Cleanup is triggered by the stream's own completion, never by a timer, so
/// segment files cannot disappear while they are still being read.
async fn finish_stream(
    handle: ArchiveHandle,
    timeout: Option<Duration>,
    scratch: ScratchGuard,
    job: JobGuard,
) -> StreamReport {
    let archive = handle.wait(timeout).await;
    let cleanup = scratch.release().await;
    let report = StreamReport { archive, cleanup };

    match &report.archive {
        Ok(summary) => info!(
            "Job {}: archive sent ({} entries, {} input bytes)",
            job.id(),
            summary.entries,
            summary.input_bytes
        ),
        // Headers are already out; the client only sees a broken stream
        Err(e) => error!("Job {}: archive stream aborted: {}", job.id(), e),
    }
    if !report.cleanup.is_clean() {
        warn!(
            "Job {}: {} path(s) left behind",
            job.id(),
            report.cleanup.failed.len()
        );
    }

    drop(job);
    report
}
