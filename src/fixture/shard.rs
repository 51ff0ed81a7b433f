use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use super::Fixture;

#[derive(Debug, Default, Clone)]
pub struct ShardStats {
    pub records: usize,
    pub files: Vec<PathBuf>,
}

/// Buffers fixtures and writes `{prefix}-{n}.json` every `max` records.
pub struct ShardWriter {
    dir: PathBuf,
    prefix: &'static str,
    max: usize,
    buffer: Vec<Fixture>,
    stats: ShardStats,
}

impl ShardWriter {
    pub fn new(dir: &Path, prefix: &'static str, max: usize) -> Self {
        ShardWriter {
            dir: dir.to_path_buf(),
            prefix,
            max: max.max(1),
            buffer: Vec::new(),
            stats: ShardStats::default(),
        }
    }

    pub fn push(&mut self, fixture: Fixture) -> Result<()> {
        self.buffer.push(fixture);
        self.stats.records += 1;
        if self.buffer.len() >= self.max {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let path = self
            .dir
            .join(format!("{}-{}.json", self.prefix, self.stats.files.len() + 1));
        let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer(&mut out, &self.buffer)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        out.flush()?;
        debug!("Wrote {} fixtures to {}", self.buffer.len(), path.display());
        // release the buffer's memory, not just its contents
        self.buffer = Vec::new();
        self.stats.files.push(path);
        Ok(())
    }

    /// Write the final shard, even when it is empty.
    pub fn finish(mut self) -> Result<ShardStats> {
        self.flush()?;
        Ok(self.stats)
    }
}

/// Shard every fixture from `fixtures` into `dir`.
pub fn save_all<I>(dir: &Path, prefix: &'static str, max: usize, fixtures: I) -> Result<ShardStats>
where
    I: IntoIterator<Item = Fixture>,
{
    let mut writer = ShardWriter::new(dir, prefix, max);
    for fixture in fixtures {
        writer.push(fixture)?;
    }
    writer.finish()
}
