// Claim Navigator forensic audit service

mod benchmarks;
mod compliance;
mod completion;
mod config;
mod forensic;
mod rates;
mod registry;
mod scrubber;
mod session;
mod types;
pub mod http_server;

// Re-export necessary items for the server binary
pub use completion::OpenAiCompletionClient;
pub use config::{ForensicConfig, ServiceConfig};
pub use rates::RateClient;
pub use registry::SessionRegistry;
pub use scrubber::ScrubEngine;
pub use session::{SessionDeps, SessionHandle, SessionSnapshot};
