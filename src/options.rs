//! CLI options

use std::path::PathBuf;

use argh::FromArgs;

#[derive(FromArgs)]
/// Gecco interpreter
pub struct Options {
    /// an optional script to run
    #[argh(positional)]
    pub filepath: Option<PathBuf>,

    /// enable tokio tracing
    #[argh(switch)]
    pub tracing: bool,

    /// trace each instruction as it executes (also needs the debug_trace build feature)
    #[argh(switch)]
    pub trace: bool,
}
