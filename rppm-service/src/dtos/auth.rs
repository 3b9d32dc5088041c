use crate::models::Profile;
use crate::services::AuthMode;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct AuthRequest {
    #[validate(length(min = 1, max = 64, message = "Access code is required"))]
    pub code: String,

    #[validate(length(min = 1, max = 256, message = "Device identity is required"))]
    pub device_id: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub profile: Profile,
    /// `unconfigured` when the code was accepted without a credential store.
    pub mode: AuthMode,
    pub first_binding: bool,
    pub operating_mode: &'static str,
}
