//! Shared rotating-file primitive: rotates on size or (for JSONL) date
//! change, renaming the live file to `name.YYYYMMDD-HHMMSS.ext` and
//! opening a fresh one. The rename is atomic on a POSIX filesystem
//! (`std::fs::rename` within the same directory).

use std::path::{Path, PathBuf};

use chrono::Utc;
use cobalt_common::error::{CobaltError, CobaltResult};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

pub struct RotatingFile {
    dir: PathBuf,
    base_name: &'static str,
    ext: &'static str,
    max_size_bytes: u64,
    rotate_on_date_change: bool,
    file: File,
    bytes_written: u64,
    opened_date: chrono::NaiveDate,
}

impl RotatingFile {
    pub async fn open(
        dir: &Path,
        base_name: &'static str,
        ext: &'static str,
        max_size_bytes: u64,
        rotate_on_date_change: bool,
    ) -> CobaltResult<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(CobaltError::IoError)?;
        let live_path = dir.join(format!("{base_name}.{ext}"));
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&live_path)
            .await
            .map_err(CobaltError::IoError)?;
        let bytes_written = file
            .metadata()
            .await
            .map_err(CobaltError::IoError)?
            .len();
        Ok(Self {
            dir: dir.to_path_buf(),
            base_name,
            ext,
            max_size_bytes,
            rotate_on_date_change,
            file,
            bytes_written,
            opened_date: Utc::now().date_naive(),
        })
    }

    fn live_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}", self.base_name, self.ext))
    }

    /// Rotates the live file if it has already crossed its size or date
    /// boundary. Returns `true` if the file that writes will now land in
    /// is empty (freshly opened or just rotated) -- the caller uses this
    /// to know whether a header line is needed before the next write.
    pub async fn prepare_write(&mut self) -> CobaltResult<bool> {
        let date_changed = self.rotate_on_date_change && Utc::now().date_naive() != self.opened_date;
        if self.bytes_written < self.max_size_bytes && !date_changed {
            return Ok(self.bytes_written == 0);
        }

        self.file.flush().await.map_err(CobaltError::IoError)?;
        let now = Utc::now();
        let rotated_name = format!(
            "{}.{}.{}",
            self.base_name,
            now.format("%Y%m%d-%H%M%S"),
            self.ext
        );
        let rotated_path = self.dir.join(rotated_name);
        let live_path = self.live_path();
        tokio::fs::rename(&live_path, &rotated_path)
            .await
            .map_err(CobaltError::IoError)?;

        self.file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&live_path)
            .await
            .map_err(CobaltError::IoError)?;
        self.bytes_written = 0;
        self.opened_date = Utc::now().date_naive();
        Ok(true)
    }

    /// Writes `bytes` without checking rotation -- callers must have
    /// already called `prepare_write` for this write.
    pub async fn write_all(&mut self, bytes: &[u8]) -> CobaltResult<()> {
        self.file.write_all(bytes).await.map_err(CobaltError::IoError)?;
        self.bytes_written += bytes.len() as u64;
        Ok(())
    }

    pub async fn flush(&mut self) -> CobaltResult<()> {
        self.file.flush().await.map_err(CobaltError::IoError)
    }
}
