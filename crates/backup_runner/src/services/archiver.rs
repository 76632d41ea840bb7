//! Local artifact production: database dump and files archive
//!
//! Artifacts are staged in the working directory and reused when already
//! present, so an attempt that failed after the dump but before the upload
//! does not redo the dump on retry.

use crate::config::BackupConfig;
use crate::models::error::GenerationError;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{info, warn};

pub const DATABASE_ARTIFACT: &str = "database.sql.gz";
pub const FILES_ARTIFACT: &str = "files.tar.gz";

/// Subdirectories of the files root that hold transient or derivative
/// content and are never archived.
const EXCLUDED_DIRS: [&str; 2] = ["tmp", "style"];

#[derive(Debug)]
pub struct BackupArchiver {
    working_dir: PathBuf,
    files_root: PathBuf,
    dump_command: String,
}

impl BackupArchiver {
    pub fn new(config: &BackupConfig) -> Self {
        Self {
            working_dir: config.working_dir.clone(),
            files_root: config.files_root.clone(),
            dump_command: config.database_dump_command.clone(),
        }
    }

    pub fn database_dump_path(&self) -> PathBuf {
        self.working_dir.join(DATABASE_ARTIFACT)
    }

    pub fn files_archive_path(&self) -> PathBuf {
        self.working_dir.join(FILES_ARTIFACT)
    }

    /// Produces the compressed database dump, or returns the one already
    /// staged from an earlier attempt.
    pub async fn ensure_database_dump(&self) -> Result<PathBuf, GenerationError> {
        let dump_path = self.database_dump_path();
        if dump_path.exists() {
            info!(path = %dump_path.display(), "Reusing staged database dump");
            return Ok(dump_path);
        }

        fs::create_dir_all(&self.working_dir).await?;

        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.dump_command)
            .output()
            .await
            .map_err(|e| GenerationError::DumpFailed(format!("could not run dump command: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GenerationError::DumpFailed(format!(
                "dump command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&output.stdout)?;
        let compressed = encoder.finish()?;
        fs::write(&dump_path, compressed).await?;

        info!(path = %dump_path.display(), bytes = output.stdout.len(), "Database dump created");
        Ok(dump_path)
    }

    /// Produces the tar.gz archive of the files root, or returns the one
    /// already staged from an earlier attempt.
    pub async fn ensure_files_archive(&self) -> Result<PathBuf, GenerationError> {
        let archive_path = self.files_archive_path();
        if archive_path.exists() {
            info!(path = %archive_path.display(), "Reusing staged files archive");
            return Ok(archive_path);
        }

        if !self.files_root.exists() {
            return Err(GenerationError::ArchiveFailed(format!(
                "files root {} does not exist",
                self.files_root.display()
            )));
        }

        fs::create_dir_all(&self.working_dir).await?;

        let file = fs::File::create(&archive_path).await?;
        let file = file.into_std().await;

        let encoder = GzEncoder::new(file, Compression::default());
        let mut tar = tar::Builder::new(encoder);

        let mut stack = vec![self.files_root.clone()];
        let mut appended = 0usize;
        while let Some(current) = stack.pop() {
            let mut entries = fs::read_dir(&current).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let relative = path
                    .strip_prefix(&self.files_root)
                    .map_err(|e| GenerationError::ArchiveFailed(format!("path error: {}", e)))?;
                let relative_str = relative.to_string_lossy().replace('\\', "/");

                let metadata = entry.metadata().await?;
                if metadata.is_dir() {
                    if is_excluded(&path) {
                        continue;
                    }
                    tar.append_dir(&relative_str, &path).map_err(|e| {
                        GenerationError::ArchiveFailed(format!("tar append_dir error: {}", e))
                    })?;
                    stack.push(path);
                } else if metadata.is_file() {
                    let mut file = fs::File::open(&path).await?;
                    let mut contents = Vec::new();
                    file.read_to_end(&mut contents).await?;

                    let mut header = tar::Header::new_gnu();
                    header.set_path(&relative_str).map_err(|e| {
                        GenerationError::ArchiveFailed(format!("tar header error: {}", e))
                    })?;
                    header.set_size(contents.len() as u64);
                    header.set_mode(0o644);
                    header.set_cksum();

                    tar.append(&header, contents.as_slice()).map_err(|e| {
                        GenerationError::ArchiveFailed(format!("tar append error: {}", e))
                    })?;
                    appended += 1;
                }
            }
        }

        tar.finish()
            .map_err(|e| GenerationError::ArchiveFailed(format!("tar finish error: {}", e)))?;

        info!(path = %archive_path.display(), files = appended, "Files archive created");
        Ok(archive_path)
    }

    /// Removes staged artifacts. Absence is not an error.
    pub async fn clean_up(&self) {
        for path in [self.database_dump_path(), self.files_archive_path()] {
            if path.exists() {
                if let Err(e) = fs::remove_file(&path).await {
                    warn!(path = %path.display(), error = %e, "Failed to remove staged artifact");
                }
            }
        }
    }

    /// Checks that the working directory is writable and the files root is
    /// readable, without producing any artifact.
    pub async fn verify_local_access(&self) -> Result<(), GenerationError> {
        fs::create_dir_all(&self.working_dir).await?;
        let probe = self.working_dir.join(".write-probe");
        fs::write(&probe, b"ok").await?;
        fs::remove_file(&probe).await?;

        let mut entries = fs::read_dir(&self.files_root).await?;
        let _ = entries.next_entry().await?;
        Ok(())
    }
}

fn is_excluded(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| EXCLUDED_DIRS.contains(&name))
        .unwrap_or(false)
}
