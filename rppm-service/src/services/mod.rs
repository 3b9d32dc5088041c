pub mod authenticator;
pub mod clock;
pub mod credentials;
pub mod device;
pub mod error;
pub mod gate;
pub mod lesson;
pub mod metrics;
pub mod providers;
pub mod usage;

pub use authenticator::{AuthMode, Authenticator, WeakIdentityPolicy};
pub use clock::{Clock, SystemClock};
pub use gate::AdmissionGate;
pub use providers::CompletionInvoker;
pub use usage::UsageRecorder;
