use std::path::PathBuf;
use std::sync::Once;

static CREATE_DIR_WARNED: Once = Once::new();

/// Resolve the Lightbox home directory.
///
/// Priority:
/// 1) LIGHTBOX_HOME
/// 2) ~/.lightbox
/// 3) ./.lightbox
pub fn lightbox_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("LIGHTBOX_HOME") {
        return PathBuf::from(override_path);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".lightbox");
    }
    PathBuf::from(".").join(".lightbox")
}

fn ensured_home() -> PathBuf {
    let home = lightbox_home();
    if let Err(err) = std::fs::create_dir_all(&home) {
        CREATE_DIR_WARNED.call_once(|| {
            eprintln!(
                "Warning: failed to create Lightbox home directory {}: {}. Set LIGHTBOX_HOME.",
                home.display(),
                err
            );
        });
    }
    home
}

/// Default artifact store root: ~/.lightbox/store
pub fn default_store_root() -> PathBuf {
    ensured_home().join("store")
}

/// Default result database: ~/.lightbox/results.sqlite
pub fn default_results_db_path() -> PathBuf {
    ensured_home().join("results.sqlite")
}

/// Default config file: ~/.lightbox/lightbox.toml
pub fn default_config_path() -> PathBuf {
    lightbox_home().join("lightbox.toml")
}

/// Default logs directory: ~/.lightbox/logs
pub fn default_logs_dir() -> PathBuf {
    ensured_home().join("logs")
}
