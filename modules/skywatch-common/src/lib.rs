pub mod types;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod fixtures;
pub mod quality;

pub use types::*;
pub use config::Config;
pub use error::SkywatchError;
pub use fingerprint::{fingerprint, report_fingerprint};
pub use quality::*;
