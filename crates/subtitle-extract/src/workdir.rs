use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

const WORKDIR_SUFFIX: &str = "subtitle-extract";
const RAW_LOG_NAME: &str = "raw.txt";
const EXTRACTOR_SRT_NAME: &str = "raw_extractor.srt";

/// Per-video scratch directory for checkpoints and extractor output.
///
/// Lives next to the output file as `.<stem>.subtitle-extract/`. Removed on
/// drop unless it was created with `keep` set.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    keep: bool,
}

impl WorkDir {
    pub fn location(output: &Path, stem: &str) -> PathBuf {
        let parent = output
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        parent.join(format!(".{stem}.{WORKDIR_SUFFIX}"))
    }

    /// Creates an empty directory, wiping leftovers from a previous run.
    pub async fn create(output: &Path, stem: &str, keep: bool) -> io::Result<Self> {
        let path = Self::location(output, stem);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => debug!(path = %path.display(), "removed stale working directory"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path, keep })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn raw_log(&self) -> PathBuf {
        self.path.join(RAW_LOG_NAME)
    }

    pub fn extractor_srt(&self) -> PathBuf {
        self.path.join(EXTRACTOR_SRT_NAME)
    }

    pub fn keeps_files(&self) -> bool {
        self.keep
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep {
            debug!(path = %self.path.display(), "keeping working directory");
            return;
        }
        if let Err(err) = std::fs::remove_dir_all(&self.path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %err, "failed to remove working directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sits_next_to_the_output() {
        assert_eq!(
            WorkDir::location(Path::new("/videos/out/movie.srt"), "movie"),
            PathBuf::from("/videos/out/.movie.subtitle-extract")
        );
        assert_eq!(
            WorkDir::location(Path::new("movie.srt"), "movie"),
            PathBuf::from("./.movie.subtitle-extract")
        );
    }

    #[tokio::test]
    async fn wipes_on_create_and_removes_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("movie.srt");
        let stale = WorkDir::location(&output, "movie").join("leftover");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, b"old").unwrap();

        let workdir = WorkDir::create(&output, "movie", false).await.unwrap();
        assert!(!stale.exists());
        std::fs::write(workdir.raw_log(), b"0\t(1, 2, 3, 4)\tx\n").unwrap();
        let path = workdir.path().to_path_buf();
        drop(workdir);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn keep_leaves_files_behind() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("movie.srt");
        let workdir = WorkDir::create(&output, "movie", true).await.unwrap();
        assert!(workdir.keeps_files());
        let path = workdir.path().to_path_buf();
        drop(workdir);
        assert!(path.is_dir());
    }
}
