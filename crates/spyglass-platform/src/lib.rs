//! spyglass-platform: host paths, log files, and debuggee path rules.
pub mod error;
pub mod logging;
pub mod path_style;
pub mod paths;

pub use error::PlatformError;
pub use path_style::{HidePatterns, PathStyle};
pub use paths::{DefaultPaths, PlatformPaths};
