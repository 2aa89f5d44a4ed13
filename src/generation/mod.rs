//! Generation request dedup cache
//!
//! Sits in front of the expensive video/image generation call. Requests are
//! hashed over their normalized parameters and matched against completed jobs
//! for the same user inside the freshness window. The generation call itself
//! lives outside this crate; on a miss the caller gets the hash to tag the
//! new job with.

pub mod sqlite;

use crate::catalog::hash::content_hash;
use crate::config;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for GenerationError {
    fn from(e: rusqlite::Error) -> Self {
        GenerationError::Database(e.to_string())
    }
}

/// The meaning-bearing fields of a generation request.
///
/// Missing fields deserialize to their empty defaults, which is exactly how
/// the hasher normalizes them, so "absent" and "empty" are the same request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub resolution: String,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub preset_id: String,
    #[serde(default)]
    pub aspect_ratio: String,
    #[serde(default)]
    pub camera_move: String,
    #[serde(default)]
    pub style_reference_id: String,
}

impl GenerationParams {
    /// Canonical digest over every output-affecting field.
    pub fn content_hash(&self) -> String {
        let duration = self
            .duration_seconds
            .map(|d| d.to_string())
            .unwrap_or_default();
        content_hash(&[
            ("prompt", &self.prompt),
            ("model", &self.model),
            ("resolution", &self.resolution),
            ("duration", &duration),
            ("preset_id", &self.preset_id),
            ("aspect_ratio", &self.aspect_ratio),
            ("camera_move", &self.camera_move),
            ("style_reference_id", &self.style_reference_id),
        ])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// One requested generation. Multiple jobs may share a content hash; the id
/// is the identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: String,
    pub user_id: String,
    pub content_hash: String,
    pub status: JobStatus,
    pub output_reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a cache probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    /// A fresh completed job exists; skip the generation call.
    Hit {
        output_reference: String,
        job_id: String,
    },
    /// No usable prior job. The caller runs the generation and tags the new
    /// job with this hash.
    Miss { content_hash: String },
}

/// Persistent store for generation jobs.
///
/// No uniqueness on `content_hash`: concurrent identical requests create
/// parallel rows and the most recent completed one wins at lookup time.
#[async_trait::async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &GenerationJob) -> Result<(), GenerationError>;

    async fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        output_reference: Option<&str>,
    ) -> Result<(), GenerationError>;

    /// Most recent job matching user, hash, completed status, non-null
    /// output, and `created_at >= cutoff`. All conditions together.
    async fn find_completed(
        &self,
        user_id: &str,
        content_hash: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<Option<GenerationJob>, GenerationError>;
}

/// The dedup guard in front of the generation upstream.
pub struct GenerationCache {
    jobs: Arc<dyn JobStore>,
}

impl GenerationCache {
    pub fn new(jobs: Arc<dyn JobStore>) -> Self {
        Self { jobs }
    }

    /// Probe for a reusable result. A store failure is a miss, not an error:
    /// the caller falls through to the always-correct generation path.
    pub async fn check(&self, user_id: &str, params: &GenerationParams) -> CacheDecision {
        let content_hash = params.content_hash();
        let cutoff = Utc::now() - Duration::hours(config::GENERATION_FRESHNESS_HOURS);

        match self.jobs.find_completed(user_id, &content_hash, cutoff).await {
            Ok(Some(job)) => match job.output_reference {
                Some(output_reference) => {
                    info!(
                        "♻️ Generation cache hit for user {user_id} (job {})",
                        job.id
                    );
                    CacheDecision::Hit {
                        output_reference,
                        job_id: job.id,
                    }
                }
                None => CacheDecision::Miss { content_hash },
            },
            Ok(None) => CacheDecision::Miss { content_hash },
            Err(e) => {
                warn!("⚠️ Generation cache check failed, treating as miss: {e}");
                CacheDecision::Miss { content_hash }
            }
        }
    }

    /// Record a new pending job tagged with the params hash.
    pub async fn begin_job(
        &self,
        user_id: &str,
        params: &GenerationParams,
    ) -> Result<GenerationJob, GenerationError> {
        let job = GenerationJob {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            content_hash: params.content_hash(),
            status: JobStatus::Pending,
            output_reference: None,
            created_at: Utc::now(),
        };
        self.jobs.insert(&job).await?;
        Ok(job)
    }

    pub async fn complete_job(
        &self,
        job_id: &str,
        output_reference: &str,
    ) -> Result<(), GenerationError> {
        self.jobs
            .update_status(job_id, JobStatus::Completed, Some(output_reference))
            .await
    }

    pub async fn fail_job(&self, job_id: &str) -> Result<(), GenerationError> {
        self.jobs.update_status(job_id, JobStatus::Failed, None).await
    }
}
