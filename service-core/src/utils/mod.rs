pub mod secrets;

pub use secrets::{constant_time_eq, redact};
