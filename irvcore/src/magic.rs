/// Name of the environment variable containing the path to the project file.
/// If not set, defaults to
///  (1) on Linux and macOS: `$XDG_CONFIG_HOME/irview/project.toml` or `$HOME/.config/irview/project.toml`
///  (2) on Windows: `%APPDATA%\irview\project.toml`
pub const ENV_PROJECT_CONFIG_PATH: &str = "IRV_CONFIG_PATH";

/// Directory and file name of the default project file.
pub const CONFIG_DIR_NAME: &str = "irview";
pub const CONFIG_FILE_NAME: &str = "project.toml";

/// Extension of hardware-description sources scanned when none is configured.
pub const DEFAULT_SOURCE_EXTENSION: &str = "sv";

/// Name given to the background load thread.
pub const LOADER_THREAD_NAME: &str = "irv-loader";
