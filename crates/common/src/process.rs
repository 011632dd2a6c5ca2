use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::debug;

/// Write the current process id to `<dir>/<name>.pid`, creating `dir` if needed.
///
/// Returns the path written to.
pub fn save_pid(dir: &Path, name: &str) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("{name}.pid"));
    fs::write(&path, std::process::id().to_string())?;
    debug!(path = %path.display(), "saved pid file");
    Ok(path)
}
