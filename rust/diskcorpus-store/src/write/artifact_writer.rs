//! Writers for collection artifacts (shard data files, offsets tables, config).

use std::path::{Path, PathBuf};

use diskcorpus_common::{Result, error::Error};
use diskcorpus_io::{SealingWrite, file::FileWriter};

/// A writer appending data to an artifact, tracking the current write position.
///
/// Wraps the `SealingWrite` abstraction; the artifact is complete only once
/// [`seal`](ArtifactWriter::seal) succeeds.
pub struct ArtifactWriter {
    inner: Box<dyn SealingWrite>,
    pos: u64,
    name: String,
}

impl ArtifactWriter {
    pub fn new(writer: Box<dyn SealingWrite>, name: impl Into<String>) -> ArtifactWriter {
        ArtifactWriter {
            inner: writer,
            pos: 0,
            name: name.into(),
        }
    }

    /// Name of the artifact, as used in error reports.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Writes (appends) the entire buffer to the artifact.
    pub fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.inner
            .write_all(buf)
            .map_err(|e| Error::io(self.name.clone(), e))?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    /// Seals the writer and returns the total artifact size.
    pub fn seal(mut self) -> Result<u64> {
        self.inner
            .seal()
            .map_err(|e| Error::io(self.name.clone(), e))?;
        Ok(self.pos)
    }
}

/// A local file artifact written under a temporary sibling name and published
/// at its final path by [`publish`](LocalArtifact::publish).
///
/// Dropping an unpublished artifact removes the temporary file.
pub struct LocalArtifact {
    temp_path: PathBuf,
    path: PathBuf,
    published: bool,
}

impl LocalArtifact {
    /// Creates the temporary file and returns the artifact with its writer.
    pub fn create(path: impl Into<PathBuf>) -> Result<(LocalArtifact, ArtifactWriter)> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io(parent.display().to_string(), e))?;
        }
        let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
        temp_name.push(format!(".{:08x}.tmp", fastrand::u32(..)));
        let temp_path = path.with_file_name(temp_name);
        let file = FileWriter::create(&temp_path)
            .map_err(|e| Error::io(temp_path.display().to_string(), e))?;
        let writer = ArtifactWriter::new(Box::new(file), path.display().to_string());
        let artifact = LocalArtifact {
            temp_path,
            path,
            published: false,
        };
        Ok((artifact, writer))
    }

    /// Final path of the artifact.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Renames the artifact into place. The writer must have been sealed.
    pub fn publish(mut self) -> Result<()> {
        std::fs::rename(&self.temp_path, &self.path)
            .map_err(|e| Error::io(self.path.display().to_string(), e))?;
        self.published = true;
        Ok(())
    }
}

impl Drop for LocalArtifact {
    fn drop(&mut self) {
        if !self.published {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

/// Writes `content` to `path` as a single published artifact.
pub fn write_artifact(path: impl Into<PathBuf>, content: &[u8]) -> Result<u64> {
    let (artifact, mut writer) = LocalArtifact::create(path)?;
    writer.write_all(content)?;
    let size = writer.seal()?;
    artifact.publish()?;
    Ok(size)
}
