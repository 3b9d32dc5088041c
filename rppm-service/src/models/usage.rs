use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UsageEvent {
    AuthSuccess,
    AuthFailed,
    GenerateSuccess,
    GenerateDenied,
    GenerateTimeout,
    GenerateFailed,
}

impl UsageEvent {
    pub const ALL: [UsageEvent; 6] = [
        UsageEvent::AuthSuccess,
        UsageEvent::AuthFailed,
        UsageEvent::GenerateSuccess,
        UsageEvent::GenerateDenied,
        UsageEvent::GenerateTimeout,
        UsageEvent::GenerateFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            UsageEvent::AuthSuccess => "auth_success",
            UsageEvent::AuthFailed => "auth_failed",
            UsageEvent::GenerateSuccess => "generate_success",
            UsageEvent::GenerateDenied => "generate_denied",
            UsageEvent::GenerateTimeout => "generate_timeout",
            UsageEvent::GenerateFailed => "generate_failed",
        }
    }
}

impl fmt::Display for UsageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the usage counter table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct UsageCounter {
    pub kind: String,
    pub count: i64,
    pub updated_at: DateTime<Utc>,
}
