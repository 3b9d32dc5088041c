use crate::services::gate::AdmissionPath;
use crate::services::lesson::{LessonPlan, LessonRequest};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use validator::Validate;

fn default_meetings() -> u8 {
    1
}

fn default_minutes() -> u16 {
    70
}

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateRequest {
    #[validate(length(min = 1, max = 120, message = "Teacher name is required"))]
    pub teacher_name: String,

    #[validate(length(min = 1, max = 160, message = "School name is required"))]
    pub school_name: String,

    #[validate(length(min = 1, max = 120, message = "Subject is required"))]
    pub subject: String,

    #[validate(range(min = 1, max = 12, message = "Grade must be between 1 and 12"))]
    pub grade: u8,

    #[validate(length(min = 1, max = 300, message = "Topic is required"))]
    pub topic: String,

    #[serde(default = "default_meetings")]
    #[validate(range(min = 1, max = 10, message = "Meetings must be between 1 and 10"))]
    pub meetings: u8,

    #[serde(default = "default_minutes")]
    #[validate(range(min = 10, max = 300, message = "Minutes per meeting must be between 10 and 300"))]
    pub minutes_per_meeting: u16,

    #[validate(length(max = 120))]
    pub learning_model: Option<String>,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,

    /// Device identity, used for bucketing when no address is known.
    #[validate(length(max = 256))]
    pub device_id: Option<String>,

    /// Caller's own upstream key.
    pub api_key: Option<SecretString>,

    /// Token from an earlier timed-out attempt.
    #[validate(length(max = 64))]
    pub retry_token: Option<String>,
}

impl GenerateRequest {
    /// Trimmed lesson inputs. Fields that are blank after trimming are rejected.
    pub fn lesson(&self) -> Result<LessonRequest, AppError> {
        fn required(name: &str, value: &str) -> Result<String, AppError> {
            let value = value.trim();
            if value.is_empty() {
                return Err(AppError::BadRequest(anyhow::anyhow!("{} is required", name)));
            }
            Ok(value.to_string())
        }

        fn optional(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        }

        Ok(LessonRequest {
            teacher_name: required("teacher_name", &self.teacher_name)?,
            school_name: required("school_name", &self.school_name)?,
            subject: required("subject", &self.subject)?,
            grade: self.grade,
            topic: required("topic", &self.topic)?,
            meetings: self.meetings,
            minutes_per_meeting: self.minutes_per_meeting,
            learning_model: optional(&self.learning_model),
            notes: optional(&self.notes),
        })
    }
}

#[derive(Debug, Serialize)]
pub struct AdmissionSummary {
    pub path: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window_remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota_remaining: Option<u32>,
}

impl From<&AdmissionPath> for AdmissionSummary {
    fn from(path: &AdmissionPath) -> Self {
        let (window_remaining, quota_remaining) = match path {
            AdmissionPath::Metered {
                window_remaining,
                quota_remaining,
                ..
            } => (Some(*window_remaining), *quota_remaining),
            _ => (None, None),
        };
        Self {
            path: path.as_str(),
            window_remaining,
            quota_remaining,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub document: LessonPlan,
    pub model: String,
    pub admission: AdmissionSummary,
}
