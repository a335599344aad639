use std::path::PathBuf;

pub mod paths;
pub mod settings;

pub use paths::PathManager;
pub use settings::{LipSyncSettings, Settings, VadSettings};

/// Load environment variables from ./.env (project directory) and ~/.env (home directory).
/// Project directory values take precedence over home directory values, and
/// variables already set in the environment are never overwritten.
/// Call this before parsing CLI args so `RUST_LOG` and flag env fallbacks are visible.
pub fn load_env_file() {
    let project = std::env::current_dir().ok().map(|dir| dir.join(".env"));
    let home = dirs::home_dir().map(|dir| dir.join(".env"));
    let paths: Vec<PathBuf> = [project, home].into_iter().flatten().collect();
    load_env_files(&paths);
}

/// dotenv skips variables that are already set, so the first file to define one wins
fn load_env_files(paths: &[PathBuf]) {
    for path in paths.iter().filter(|p| p.is_file()) {
        dotenv::from_path(path).ok();
    }
}
