//! First pass: archives → cached entity tree, one report per archive.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::MultiProgress;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::archive::{Archive, ArchiveMeta};
use crate::entity::cache::{self, WriteOutcome};
use crate::entity::extract::{self, DocumentContext};
use crate::entity::EntityKind;
use crate::error::PipelineError;
use crate::reference::jisc::JiscPapers;
use crate::reference::providers::ProviderTable;
use crate::settings::Settings;
use crate::util;

/// A configured collection and its archives in processing order.
pub struct Collection {
    pub name: String,
    pub dir: PathBuf,
    pub report_id: Uuid,
    archives: Vec<PathBuf>,
}

impl Collection {
    pub fn discover(name: &str, settings: &Settings) -> Result<Self> {
        let dir = settings.collection_dir(name);
        let mut sized = Vec::new();
        if dir.is_dir() {
            for entry in WalkDir::new(&dir).min_depth(1).max_depth(1) {
                let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
                let is_zip = entry.path().extension().is_some_and(|e| e == "zip");
                if entry.file_type().is_file() && is_zip {
                    let bytes = entry.metadata()?.len();
                    sized.push((bytes, entry.into_path()));
                }
            }
        }
        if sized.is_empty() {
            return Err(PipelineError::Config(format!(
                "It looks like {} is empty in the alto2txt mountpoint: `{}`",
                name,
                dir.display()
            ))
            .into());
        }
        sized.sort();
        if settings.start_with_largest {
            sized.reverse();
        }
        Ok(Collection {
            name: name.to_string(),
            dir,
            report_id: Uuid::new_v4(),
            archives: sized.into_iter().map(|(_, p)| p).collect(),
        })
    }

    pub fn archives(&self) -> &[PathBuf] {
        &self.archives
    }
}

/// Report written when an archive's processing scope closes.
#[derive(Debug, Serialize)]
pub struct ArchiveReport {
    #[serde(flatten)]
    pub meta: ArchiveMeta,
    pub start: String,
    pub end: String,
    pub seconds: u64,
    pub microseconds: u32,
    #[serde(flatten)]
    pub touched: BTreeMap<String, Vec<PathBuf>>,
}

/// Bookkeeping for one archive between open and close.
pub struct ArchiveScope {
    meta: ArchiveMeta,
    report_path: PathBuf,
    start: DateTime<Utc>,
    started: Instant,
    touched: BTreeMap<EntityKind, BTreeSet<PathBuf>>,
}

impl ArchiveScope {
    pub fn open(archive: &Archive, report_dir: &Path, report_id: Uuid) -> Self {
        ArchiveScope {
            meta: archive.meta().clone(),
            report_path: report_dir
                .join(report_id.to_string())
                .join(format!("{}.json", archive.report_stem())),
            start: Utc::now(),
            started: Instant::now(),
            touched: BTreeMap::new(),
        }
    }

    pub fn record(&mut self, kind: EntityKind, path: PathBuf) {
        self.touched.entry(kind).or_default().insert(path);
    }

    /// Deduplicate the item logs this archive appended to, then write the report.
    pub fn close(self) -> Result<ArchiveReport> {
        let mut dropped = 0;
        if let Some(logs) = self.touched.get(&EntityKind::Item) {
            for log in logs {
                dropped += cache::dedup_item_log(log)?;
            }
        }
        if dropped > 0 {
            debug!("Dropped {} duplicate item lines", dropped);
        }

        let elapsed = self.started.elapsed();
        let touched: BTreeMap<String, Vec<PathBuf>> = self
            .touched
            .into_iter()
            .map(|(kind, paths)| {
                let key = serde_json::to_value(kind)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                (format!("{}_paths", key), paths.into_iter().collect::<Vec<_>>())
            })
            .collect();
        let report = ArchiveReport {
            meta: self.meta,
            start: util::timestamp(self.start),
            end: util::timestamp(Utc::now()),
            seconds: elapsed.as_secs(),
            microseconds: elapsed.subsec_micros(),
            touched,
        };
        util::write_json(&self.report_path, &report)?;
        Ok(report)
    }
}

#[derive(Debug, Default)]
pub struct RouteSummary {
    pub collections: usize,
    pub archives: usize,
    pub documents: usize,
    pub written: usize,
    pub cached: usize,
    pub items: usize,
}

impl RouteSummary {
    pub fn print(&self) {
        println!(
            "Routed {} collections, {} archives, {} documents: {} entities written, {} already cached, {} item lines.",
            self.collections, self.archives, self.documents, self.written, self.cached, self.items,
        );
    }
}

fn route_archive(
    path: &Path,
    collection: &Collection,
    settings: &Settings,
    providers: &ProviderTable,
    jisc: &JiscPapers,
    progress: &MultiProgress,
    summary: &mut RouteSummary,
) -> Result<()> {
    let archive = Archive::open(path)?;
    let zip_file = archive.file_name();
    let mut scope = ArchiveScope::open(&archive, &settings.report_dir, collection.report_id);
    let ctx = DocumentContext {
        collection: &collection.name,
        zip_file: zip_file.as_deref(),
        jisc: Some(jisc),
        providers,
    };
    let root = settings.collection_cache(&collection.name);

    for doc in archive.into_documents(progress)? {
        let extracted = extract::extract(&doc?, &ctx)
            .with_context(|| format!("Failed to extract entities from {}", path.display()))?;
        summary.documents += 1;
        for entity in extracted.into_entities() {
            let (touched, outcome) = cache::write(&entity, &root)?;
            match outcome {
                WriteOutcome::Written => summary.written += 1,
                WriteOutcome::AlreadyCached => summary.cached += 1,
                WriteOutcome::Appended => summary.items += 1,
            }
            scope.record(entity.kind(), touched);
        }
    }

    let report = scope.close()?;
    debug!(
        "{} ({}) done in {}.{:06}s",
        report.meta.path.display(),
        report.meta.size,
        report.seconds,
        report.microseconds
    );
    summary.archives += 1;
    Ok(())
}

/// Cache every archive of every configured collection.
pub fn route(settings: &Settings, providers: &ProviderTable) -> Result<RouteSummary> {
    if !settings.mountpoint.exists() {
        return Err(PipelineError::Config(format!(
            "The mountpoint provided for alto2txt does not exist. Either create a local copy or mount it to `{}`.",
            settings.mountpoint.display()
        ))
        .into());
    }
    let jisc = JiscPapers::load(&settings.jisc_papers_csv)?;

    let progress = MultiProgress::new();
    let mut summary = RouteSummary::default();
    for name in &settings.collections {
        let collection = Collection::discover(name, settings)?;
        info!(
            "Routing {} ({} archives in {}, report {})",
            collection.name,
            collection.archives().len(),
            collection.dir.display(),
            collection.report_id
        );
        let pb = progress.add(util::progress_bar(
            collection.archives().len() as u64,
            &collection.name,
        )?);
        for path in collection.archives() {
            route_archive(path, &collection, settings, providers, &jisc, &progress, &mut summary)?;
            pb.inc(1);
        }
        pb.finish_and_clear();
        summary.collections += 1;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::write_zip;
    use crate::entity::extract::sample_document;
    use crate::settings::test_settings;
    use std::fs;
    use tempfile::TempDir;

    const JISC: &str = "Newspaper Title,NLP,Abbr,StartD,StartM,StartY,EndD,EndM,EndY\n\
                        Example Gazette,999,ABCD,1,Jan,1800,31,Dec,1900\n";

    fn mount(settings: &Settings, archives: &[(&str, Vec<String>)]) {
        fs::write(&settings.jisc_papers_csv, JISC).unwrap();
        for (name, docs) in archives {
            let entries: Vec<(String, &str)> = docs
                .iter()
                .enumerate()
                .map(|(i, d)| (format!("{}.xml", i), d.as_str()))
                .collect();
            let entries: Vec<(&str, &str)> = entries.iter().map(|(n, d)| (n.as_str(), *d)).collect();
            write_zip(&settings.collection_dir("hmd").join(name), &entries);
        }
    }

    #[test]
    fn duplicate_items_collapse_on_close() {
        let tmp = TempDir::new().unwrap();
        let settings = test_settings(tmp.path());
        let doc = sample_document("0002194", "Ipswich Journal", "0002194/1850/0101", "art0001");
        mount(&settings, &[("IPJL_metadata.zip", vec![doc.clone(), doc])]);

        let summary = route(&settings, &ProviderTable::new("legacy_code")).unwrap();
        assert_eq!(summary.documents, 2);
        assert_eq!(summary.items, 2);
        assert_eq!(summary.written, 5);
        assert_eq!(summary.cached, 5);

        let log = settings.collection_cache("hmd").join("2/1/0002194/items.jsonl");
        assert_eq!(fs::read_to_string(log).unwrap().lines().count(), 1);
    }

    #[test]
    fn writes_report_per_archive() {
        let tmp = TempDir::new().unwrap();
        let settings = test_settings(tmp.path());
        let doc = sample_document("0002194", "Ipswich Journal", "0002194/1850/0101", "art0001");
        mount(&settings, &[("IPJL_metadata.zip", vec![doc])]);

        route(&settings, &ProviderTable::new("legacy_code")).unwrap();
        let run_dirs: Vec<_> = fs::read_dir(&settings.report_dir).unwrap().collect();
        assert_eq!(run_dirs.len(), 1);
        let report_path = run_dirs[0].as_ref().unwrap().path().join("IPJL.json");
        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(report_path).unwrap()).unwrap();
        assert_eq!(report["contents"], 1);
        assert!(report["start"].is_string());
        assert_eq!(report["newspaper_paths"].as_array().unwrap().len(), 1);
        assert_eq!(report["item_paths"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn orders_archives_by_size() {
        let tmp = TempDir::new().unwrap();
        let mut settings = test_settings(tmp.path());
        let small = sample_document("0002194", "A", "0002194/1850/0101", "art0001");
        let big = sample_document("0002195", &"B".repeat(5000), "0002195/1850/0101", "art0001");
        mount(
            &settings,
            &[("big_metadata.zip", vec![big]), ("small_metadata.zip", vec![small])],
        );

        let names = |s: &Settings| -> Vec<String> {
            Collection::discover("hmd", s)
                .unwrap()
                .archives()
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect()
        };
        assert_eq!(names(&settings), vec!["small_metadata.zip", "big_metadata.zip"]);
        settings.start_with_largest = true;
        assert_eq!(names(&settings), vec!["big_metadata.zip", "small_metadata.zip"]);
    }

    #[test]
    fn empty_collection_names_its_path() {
        let tmp = TempDir::new().unwrap();
        let settings = test_settings(tmp.path());
        fs::create_dir_all(&settings.mountpoint).unwrap();
        fs::write(&settings.jisc_papers_csv, JISC).unwrap();
        let err = route(&settings, &ProviderTable::new("legacy_code")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Config(_))
        ));
        assert!(err.to_string().contains("hmd-alto2txt"));
    }

    #[test]
    fn missing_mountpoint_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let settings = test_settings(tmp.path());
        assert!(route(&settings, &ProviderTable::new("legacy_code")).is_err());
    }
}
