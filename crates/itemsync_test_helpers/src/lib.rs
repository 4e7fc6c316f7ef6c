//! Shared test utilities for ItemSync test suites
//!
//! # Modules
//!
//! - [`workspace`]: temporary workspaces with a `.itemsync` directory
//! - [`cli`]: `itemsync` command builders with quiet logging
//! - [`logging`]: test logging configuration
//! - [`assertions`]: output predicates
//!
//! # Example
//!
//! ```rust,no_run
//! use itemsync_test_helpers::prelude::*;
//!
//! let workspace = init_workspace();
//! itemsync_command()
//!     .current_dir(workspace.path())
//!     .args(["--offline", "list"])
//!     .assert()
//!     .success();
//! ```

pub mod assertions;
pub mod cli;
pub mod logging;
pub mod workspace;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::cli::itemsync_command;
    pub use crate::logging::{init_test_logging, suppress_logs};
    pub use crate::workspace::{init_workspace, temp_dir, workspace_with_config};
}
