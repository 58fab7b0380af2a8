//! Application state management
//!
//! This module defines the AppState structure that holds:
//! - Server configuration
//! - The split pipeline
//! - The registry of requests currently holding a workspace

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::pipeline::workspace::Workspace;
use crate::pipeline::Pipeline;

/// A request that currently owns a workspace
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub workspace: PathBuf,
    pub segment_seconds: u32,
    pub started_at: DateTime<Utc>,
}

/// Registry of in-flight jobs
#[derive(Debug, Default, Clone)]
pub struct ActiveJobs {
    jobs: Arc<DashMap<Uuid, JobInfo>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a job; it stays listed until the returned guard is dropped.
    pub fn register(&self, workspace: &Workspace, segment_seconds: u32) -> JobGuard {
        let info = JobInfo {
            id: workspace.id,
            workspace: workspace.path.clone(),
            segment_seconds,
            started_at: workspace.created_at,
        };
        self.jobs.insert(info.id, info);
        JobGuard {
            id: workspace.id,
            jobs: Arc::clone(&self.jobs),
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Snapshot of all jobs, oldest first
    pub fn list(&self) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by_key(|j| j.started_at);
        jobs
    }
}

/// Removes its job from the registry when dropped
#[derive(Debug)]
pub struct JobGuard {
    id: Uuid,
    jobs: Arc<DashMap<Uuid, JobInfo>>,
}

impl JobGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.jobs.remove(&self.id);
    }
}

/// Main application state
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,

    /// The split pipeline
    pub pipeline: Pipeline,

    /// Jobs currently holding a workspace
    pub jobs: ActiveJobs,
}

impl AppState {
    /// Create new application state
    pub fn new(config: ServerConfig) -> Self {
        let pipeline = Pipeline::from_config(&config);
        Self {
            config,
            pipeline,
            jobs: ActiveJobs::new(),
        }
    }
}
