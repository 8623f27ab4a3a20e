//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `run` - Drive the full customization pipeline from a selections file
//! - `init` - Write a starter selections snapshot
//! - `resolve` - Resolve and download current updates into the repository
//! - `prune` - Remove superseded artifacts from the repository
//! - `show` - Display configuration, selections, or repository contents
//! - `preflight` - Verify host tools and directories before a build
//! - `clean` - Remove staging trees and logs

pub mod clean;
pub mod init;
pub mod preflight;
pub mod prune;
pub mod resolve;
pub mod run;
pub mod show;

pub use clean::cmd_clean;
pub use init::cmd_init;
pub use preflight::cmd_preflight;
pub use prune::cmd_prune;
pub use resolve::cmd_resolve;
pub use run::cmd_run;
pub use show::cmd_show;
