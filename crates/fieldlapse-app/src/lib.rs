//! Shared plumbing for the Fieldlapse command-line shell.

pub mod settings;
pub mod sinks;

pub use settings::{ReplaySettings, load_settings};
pub use sinks::{PngDirectorySink, PngStreamSink};
