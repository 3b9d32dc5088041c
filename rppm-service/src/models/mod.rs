pub mod credential;
pub mod usage;

pub use credential::{AccessCredential, Profile};
pub use usage::{UsageCounter, UsageEvent};
