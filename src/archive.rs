//! ZIP archives of per-issue metadata documents.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{MultiProgress, ProgressBar};
use serde::Serialize;
use zip::ZipArchive;

use crate::error::PipelineError;
use crate::util::{self, human_size};
use crate::xml::{parse_document, XmlNode};

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveMeta {
    pub path: PathBuf,
    pub bytes: u64,
    pub size: String,
    pub contents: usize,
}

pub struct Archive {
    meta: ArchiveMeta,
    zip: ZipArchive<File>,
}

impl Archive {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::Config(format!(
                "archive {} does not exist",
                path.display()
            ))
            .into());
        }
        let bytes = fs::metadata(path)
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let zip = ZipArchive::new(file)
            .with_context(|| format!("Invalid ZIP archive {}", path.display()))?;
        Ok(Archive {
            meta: ArchiveMeta {
                path: path.to_path_buf(),
                bytes,
                size: human_size(bytes),
                contents: zip.len(),
            },
            zip,
        })
    }

    pub fn meta(&self) -> &ArchiveMeta {
        &self.meta
    }

    pub fn file_name(&self) -> Option<String> {
        self.meta
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }

    /// Report name: the archive stem without its `_metadata` suffix.
    pub fn report_stem(&self) -> String {
        self.meta
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().replace("_metadata", ""))
            .unwrap_or_default()
    }

    /// Single pass over the parsed documents, skipping empty entries.
    /// The entry bar is drawn under `progress`.
    pub fn into_documents(self, progress: &MultiProgress) -> Result<Documents> {
        let pb = progress.add(util::progress_bar(self.meta.contents as u64, "entries")?);
        Ok(Documents {
            zip: self.zip,
            path: self.meta.path,
            next: 0,
            pb,
        })
    }
}

pub struct Documents {
    zip: ZipArchive<File>,
    path: PathBuf,
    next: usize,
    pb: ProgressBar,
}

impl Documents {
    fn read_entry(&mut self, index: usize) -> Result<Option<(String, String)>> {
        let mut entry = self
            .zip
            .by_index(index)
            .with_context(|| format!("Failed to read entry {} of {}", index, self.path.display()))?;
        if entry.is_dir() {
            return Ok(None);
        }
        let name = entry.name().to_string();
        let mut body = String::new();
        entry
            .read_to_string(&mut body)
            .with_context(|| format!("Failed to read {} in {}", name, self.path.display()))?;
        Ok(Some((name, body)))
    }
}

impl Iterator for Documents {
    type Item = Result<XmlNode>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.zip.len() {
            let index = self.next;
            self.next += 1;
            self.pb.inc(1);
            let (name, body) = match self.read_entry(index) {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => return Some(Err(e)),
            };
            if body.trim().is_empty() {
                continue;
            }
            return Some(
                parse_document(&body)
                    .with_context(|| format!("Malformed XML in {} ({})", name, self.path.display())),
            );
        }
        self.pb.finish_and_clear();
        None
    }
}

/// Write a stored ZIP with the given `(name, body)` entries.
#[cfg(test)]
pub(crate) fn write_zip(path: &Path, entries: &[(&str, &str)]) {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, body) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}
