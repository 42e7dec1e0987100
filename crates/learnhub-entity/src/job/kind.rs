//! The closed set of job types the platform processes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use learnhub_core::error::AppError;

/// A known job type.
///
/// Every queue is derived from exactly one job type; the registry resolves
/// a `JobType` to its queue name and policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    /// Real-time platform metrics snapshot.
    RealtimeMetrics,
    /// Per-course engagement and completion aggregation.
    CourseAnalytics,
    /// Per-student progress aggregation.
    StudentAnalytics,
    /// Weekly trend report over a trailing window.
    TrendReport,
    /// Monthly executive summary report.
    ExecutiveSummary,
    /// Broker cleanup/compaction of old job records.
    QueueCleanup,
    /// Transactional and digest email delivery.
    Email,
    /// Lecture video transcoding.
    VideoTranscode,
    /// Quiz result export generation.
    QuizExport,
}

impl JobType {
    /// All known job types, in registration order.
    pub const ALL: [JobType; 9] = [
        Self::RealtimeMetrics,
        Self::CourseAnalytics,
        Self::StudentAnalytics,
        Self::TrendReport,
        Self::ExecutiveSummary,
        Self::QueueCleanup,
        Self::Email,
        Self::VideoTranscode,
        Self::QuizExport,
    ];

    /// Return the type as its kebab-case string key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RealtimeMetrics => "realtime-metrics",
            Self::CourseAnalytics => "course-analytics",
            Self::StudentAnalytics => "student-analytics",
            Self::TrendReport => "trend-report",
            Self::ExecutiveSummary => "executive-summary",
            Self::QueueCleanup => "queue-cleanup",
            Self::Email => "email",
            Self::VideoTranscode => "video-transcode",
            Self::QuizExport => "quiz-export",
        }
    }

    /// Resolve the namespaced queue name for this job type.
    pub fn queue_name(&self, prefix: &str) -> String {
        format!("{}:{}", prefix, self.as_str())
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| AppError::configuration(format!("unknown job type '{s}'")))
    }
}
