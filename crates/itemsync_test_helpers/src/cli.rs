//! CLI command builders for tests

use assert_cmd::Command;

/// The `itemsync` binary with quiet logging.
///
/// Logs are limited to errors.
///
/// ```rust,no_run
/// use itemsync_test_helpers::cli::itemsync_command;
///
/// itemsync_command().arg("--version").assert().success();
/// ```
#[allow(deprecated)]
pub fn itemsync_command() -> Command {
    let mut cmd = Command::cargo_bin("itemsync").expect("Failed to find itemsync binary");
    cmd.env("RUST_LOG", "error");
    cmd
}
