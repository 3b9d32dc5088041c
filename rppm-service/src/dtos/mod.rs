pub mod auth;
pub mod generate;

pub use auth::{AuthRequest, AuthResponse};
pub use generate::{AdmissionSummary, GenerateRequest, GenerateResponse};
