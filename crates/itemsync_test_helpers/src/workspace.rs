//! Temporary workspaces for integration tests

use assert_fs::TempDir;
use std::fs;

pub const CONFIG_DIR: &str = ".itemsync";

/// Temporary directory removed on drop
pub fn temp_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// Temp directory with an empty `.itemsync` directory
///
/// ```rust
/// use itemsync_test_helpers::workspace::init_workspace;
///
/// let workspace = init_workspace();
/// assert!(workspace.path().join(".itemsync").exists());
/// ```
pub fn init_workspace() -> TempDir {
    let temp = temp_dir();
    fs::create_dir_all(temp.path().join(CONFIG_DIR))
        .expect("Failed to create .itemsync directory");
    temp
}

/// Workspace whose `.itemsync/config.toml` holds `toml`.
///
/// Useful to point the CLI at an address nothing listens on:
///
/// ```rust
/// use itemsync_test_helpers::workspace::workspace_with_config;
///
/// let workspace = workspace_with_config("[server]\nbase_url = \"http://127.0.0.1:9\"\n");
/// assert!(workspace.path().join(".itemsync/config.toml").exists());
/// ```
pub fn workspace_with_config(toml: &str) -> TempDir {
    let workspace = init_workspace();
    fs::write(workspace.path().join(CONFIG_DIR).join("config.toml"), toml)
        .expect("Failed to write config.toml");
    workspace
}
