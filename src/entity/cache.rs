//! On-disk cache of extracted entities, one tree per collection.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::Entity;
use crate::settings::Settings;
use crate::util::{self, confirm};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    AlreadyCached,
    Appended,
}

/// Persist `entity` under `collection_root` and return the path touched.
///
/// Singleton kinds are written once; an existing file is left alone. Items
/// are appended as one JSON line to their newspaper's item log.
pub fn write(entity: &Entity, collection_root: &Path) -> Result<(PathBuf, WriteOutcome)> {
    let path = entity.cache_path(collection_root)?;

    if let Entity::Item(item) = entity {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let line = serde_json::to_string(item)?;
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open item log {}", path.display()))?;
        writeln!(log, "{}", line)
            .with_context(|| format!("Failed to append to {}", path.display()))?;
        return Ok((path, WriteOutcome::Appended));
    }

    if path.exists() {
        debug!("Already cached: {}", path.display());
        return Ok((path, WriteOutcome::AlreadyCached));
    }
    util::write_json(&path, &entity.fields()?)?;
    Ok((path, WriteOutcome::Written))
}

/// Rewrite an item log keeping the first copy of each distinct line.
/// Returns the number of lines dropped.
pub fn dedup_item_log(path: &Path) -> Result<usize> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("Failed to read item log {}", path.display()))?;
    let mut seen = HashSet::new();
    let mut kept = Vec::new();
    let mut total = 0;
    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        total += 1;
        if seen.insert(line) {
            kept.push(line);
        }
    }
    let dropped = total - kept.len();
    if dropped > 0 {
        let mut out = kept.join("\n");
        out.push('\n');
        fs::write(path, out).with_context(|| format!("Failed to rewrite {}", path.display()))?;
        debug!("Dropped {} duplicate lines from {}", dropped, path.display());
    }
    Ok(dropped)
}

/// Offer to delete the cached trees of the configured collections.
/// Returns how many trees were removed.
pub fn clear(settings: &Settings, assume_yes: bool) -> Result<usize> {
    let roots: Vec<PathBuf> = settings
        .collections
        .iter()
        .map(|c| settings.collection_cache(c))
        .filter(|p| p.exists())
        .collect();
    if roots.is_empty() {
        return Ok(0);
    }
    let listing: Vec<String> = roots.iter().map(|p| p.display().to_string()).collect();
    let prompt = format!("Do you want to empty the cache ({})?", listing.join(", "));
    if !confirm(&prompt, assume_yes)? {
        info!("Keeping cache in {}", settings.cache_home.display());
        return Ok(0);
    }
    for root in &roots {
        fs::remove_dir_all(root).with_context(|| format!("Failed to remove {}", root.display()))?;
        info!("Removed {}", root.display());
    }
    Ok(roots.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Ingest, Item, Newspaper};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn paper(title: &str) -> Entity {
        Entity::Newspaper(Newspaper {
            publication_code: "0002194".into(),
            title: title.into(),
            location: None,
        })
    }

    fn item(id: &str) -> Entity {
        Entity::Item(Item {
            item_code: format!("0002194-18500101-{}", id),
            word_count: 10,
            title: "t".into(),
            item_type: None,
            input_filename: String::new(),
            ocr_quality_mean: 0.0,
            ocr_quality_sd: 0.0,
            digitisation: None,
            ingest: "extract_text-0.4.1".into(),
            issue: "0002194-18500101".into(),
            data_provider: "Heritage Made Digital".into(),
            publication_code: "0002194".into(),
        })
    }

    #[test]
    fn singleton_write_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let (path, first) = write(&paper("First"), tmp.path()).unwrap();
        assert_eq!(first, WriteOutcome::Written);
        let before = fs::read_to_string(&path).unwrap();

        let (again, second) = write(&paper("Second"), tmp.path()).unwrap();
        assert_eq!(second, WriteOutcome::AlreadyCached);
        assert_eq!(again, path);
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert!(before.contains("First"));
    }

    #[test]
    fn ingest_goes_to_its_own_dir() {
        let tmp = TempDir::new().unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("lwm_tool_name".to_string(), "extract_text".to_string());
        fields.insert("lwm_tool_version".to_string(), "0.4.1".to_string());
        let (path, _) = write(&Entity::Ingest(Ingest { fields }), tmp.path()).unwrap();
        assert_eq!(path, tmp.path().join("ingest").join("extract_text-0.4.1.json"));
    }

    #[test]
    fn item_log_appends_then_dedups() {
        let tmp = TempDir::new().unwrap();
        let (log, outcome) = write(&item("art0001"), tmp.path()).unwrap();
        assert_eq!(outcome, WriteOutcome::Appended);
        write(&item("art0002"), tmp.path()).unwrap();
        write(&item("art0001"), tmp.path()).unwrap();
        assert_eq!(fs::read_to_string(&log).unwrap().lines().count(), 3);

        assert_eq!(dedup_item_log(&log).unwrap(), 1);
        let body = fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("art0001"));
        assert!(lines[1].contains("art0002"));

        assert_eq!(dedup_item_log(&log).unwrap(), 0);
    }

    #[test]
    fn clear_removes_configured_collections_only() {
        let tmp = TempDir::new().unwrap();
        let settings = crate::settings::test_settings(tmp.path());
        write(&paper("P"), &settings.collection_cache("hmd")).unwrap();
        write(&paper("P"), &settings.collection_cache("other")).unwrap();

        assert_eq!(clear(&settings, true).unwrap(), 1);
        assert!(!settings.collection_cache("hmd").exists());
        assert!(settings.collection_cache("other").exists());
        assert_eq!(clear(&settings, true).unwrap(), 0);
    }
}
