//! Typed job payload definitions.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::kind::JobType;

/// Typed payloads for known job types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "job_type", rename_all = "kebab-case")]
pub enum JobPayload {
    /// Snapshot real-time platform metrics.
    RealtimeMetrics {
        /// Start of the metrics window.
        window_start: DateTime<Utc>,
    },
    /// Aggregate per-course engagement for one day.
    CourseAnalytics {
        /// The day being aggregated.
        date: NaiveDate,
    },
    /// Aggregate per-student progress for one day.
    StudentAnalytics {
        /// The day being aggregated.
        date: NaiveDate,
    },
    /// Generate a trend report over a trailing window.
    TrendReport {
        /// Inclusive window start.
        period_start: DateTime<Utc>,
        /// Exclusive window end.
        period_end: DateTime<Utc>,
    },
    /// Generate the executive summary for one calendar month.
    ExecutiveSummary {
        /// First day of the reported month.
        period_start: NaiveDate,
        /// First day of the following month.
        period_end: NaiveDate,
    },
    /// Compact old job records in the broker.
    QueueCleanup {
        /// Retain records newer than this many hours.
        grace_hours: u32,
    },
    /// Send one email.
    Email {
        /// Recipient address.
        to: String,
        /// Template identifier.
        template: String,
        /// Template context.
        context: serde_json::Value,
    },
    /// Transcode a lecture video.
    VideoTranscode {
        /// Source video ID.
        video_id: Uuid,
        /// Output formats to produce.
        formats: Vec<String>,
    },
    /// Export quiz results.
    QuizExport {
        /// Quiz ID.
        quiz_id: Uuid,
        /// Export format (e.g. `"csv"`).
        format: String,
    },
}

impl JobPayload {
    /// The job type this payload belongs to.
    pub fn job_type(&self) -> JobType {
        match self {
            Self::RealtimeMetrics { .. } => JobType::RealtimeMetrics,
            Self::CourseAnalytics { .. } => JobType::CourseAnalytics,
            Self::StudentAnalytics { .. } => JobType::StudentAnalytics,
            Self::TrendReport { .. } => JobType::TrendReport,
            Self::ExecutiveSummary { .. } => JobType::ExecutiveSummary,
            Self::QueueCleanup { .. } => JobType::QueueCleanup,
            Self::Email { .. } => JobType::Email,
            Self::VideoTranscode { .. } => JobType::VideoTranscode,
            Self::QuizExport { .. } => JobType::QuizExport,
        }
    }
}
