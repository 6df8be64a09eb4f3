use std::io;
use std::path::{Path, PathBuf};

use log::warn;

/// Removes a file or a whole directory tree. A missing path is not an error.
pub fn remove(path: &Path) -> io::Result<()> {
    let result = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match result {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

pub trait PathExt {
    fn remove(&self) -> io::Result<()>;

    /// Like `remove`, but a failure is only logged.
    fn remove_quietly(&self);
}

impl PathExt for Path {
    fn remove(&self) -> io::Result<()> {
        remove(self)
    }

    fn remove_quietly(&self) {
        if let Err(err) = remove(self) {
            warn!("Remove {} failed: {}", self.to_string_lossy(), err);
        }
    }
}

impl PathExt for PathBuf {
    fn remove(&self) -> io::Result<()> {
        self.as_path().remove()
    }

    fn remove_quietly(&self) {
        self.as_path().remove_quietly()
    }
}
