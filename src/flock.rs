use std::{
    fs::File,
    path::Path,
    time::{Duration, Instant},
};

use fs4::fs_std::FileExt;
use log::{debug, info};
use thiserror::Error;

const LOCK_FILE: &str = ".lock";
const MAX_WAIT: Duration = Duration::from_secs(300);

/// Exclusive advisory lock on a mirror store, held until dropped. Keeps
/// concurrent runs sharing one cache volume from cloning into the same
/// directories.
pub struct FileLock {
    _file: File,
}

#[derive(Error, Debug)]
#[error("could not lock {path}: {source}")]
pub struct Error {
    path: String,
    source: std::io::Error,
}

impl FileLock {
    pub fn acquire(location: &Path) -> Result<Self, Error> {
        let path = location.join(LOCK_FILE);
        let error = |source| Error {
            path: path.display().to_string(),
            source,
        };

        std::fs::create_dir_all(location).map_err(error)?;
        let file = File::create(&path).map_err(error)?;
        debug!("Acquiring a lock on the mirror store: {}", path.display());
        let start = Instant::now();
        loop {
            match file.try_lock_exclusive() {
                Ok(_) => {
                    info!("Acquired a lock on the mirror store");
                    return Ok(Self { _file: file });
                }
                Err(e)
                    if e.raw_os_error() == fs4::lock_contended_error().raw_os_error()
                        && start.elapsed() < MAX_WAIT =>
                {
                    debug!("Failed to acquire a lock on {}, retrying", path.display());
                    std::thread::sleep(Duration::from_secs(1));
                }
                Err(e) => return Err(error(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_creates_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("v2");

        let _lock = FileLock::acquire(&location).unwrap();

        assert!(location.join(LOCK_FILE).is_file());
    }
}
