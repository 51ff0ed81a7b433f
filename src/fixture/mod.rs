//! Second pass: cached entity tree → sharded fixture files with resolved keys.

pub mod shard;
pub mod translate;

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::entity::EntityKind;
use crate::error::PipelineError;
use crate::settings::Settings;
use crate::util::{self, confirm};
use shard::{save_all, ShardStats, ShardWriter};
use translate::{key_part, ForeignKeyIndex};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub pk: u64,
    pub model: String,
    pub fields: Map<String, Value>,
}

/// Cached files by entity kind, each list in sorted path order.
#[derive(Debug, Default)]
pub struct CacheFiles {
    files: BTreeMap<EntityKind, Vec<PathBuf>>,
}

const NESTED_KINDS: &[EntityKind] = &[
    EntityKind::DataProvider,
    EntityKind::Ingest,
    EntityKind::Digitisation,
    EntityKind::Issue,
];

/// Kind of a cache file from its path relative to the cache root.
fn classify(relative: &Path) -> Option<EntityKind> {
    match relative.extension()?.to_str()? {
        "jsonl" => Some(EntityKind::Item),
        "json" => {
            let dirs: Vec<&str> = relative
                .parent()
                .map(|p| p.iter().filter_map(|c| c.to_str()).collect())
                .unwrap_or_default();
            let nested = NESTED_KINDS
                .iter()
                .copied()
                .find(|k| k.dir_name().is_some_and(|d| dirs.contains(&d)));
            Some(nested.unwrap_or(EntityKind::Newspaper))
        }
        _ => None,
    }
}

impl CacheFiles {
    pub fn discover(settings: &Settings) -> Result<Self> {
        let mut files: BTreeMap<EntityKind, Vec<PathBuf>> = BTreeMap::new();
        for collection in &settings.collections {
            let root = settings.collection_cache(collection);
            if !root.exists() {
                warn!("No cache for collection {} at {}", collection, root.display());
                continue;
            }
            for entry in WalkDir::new(&root) {
                let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(&settings.cache_home)
                    .unwrap_or(entry.path());
                if let Some(kind) = classify(relative) {
                    files.entry(kind).or_default().push(entry.into_path());
                }
            }
        }
        for list in files.values_mut() {
            list.sort();
            list.dedup();
        }
        Ok(CacheFiles { files })
    }

    pub fn of(&self, kind: EntityKind) -> &[PathBuf] {
        self.files.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }
}

fn as_record(value: Value, source: &str) -> Result<Map<String, Value>, PipelineError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(PipelineError::structure(
            source,
            format!("expected a JSON object, found {}", other),
        )),
    }
}

fn read_record(path: &Path) -> Result<Map<String, Value>> {
    let body = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&body)
        .with_context(|| format!("Cannot interpret JSON in {}", path.display()))?;
    Ok(as_record(value, &path.display().to_string())?)
}

/// Field clean-up applied to every fixture.
pub fn normalize_fields(fields: &mut Map<String, Value>, now: &str) {
    fields.insert("created_at".into(), Value::from(now));
    fields.insert("updated_at".into(), Value::from(now));
    if let Some(Value::String(t)) = fields.get_mut("item_type") {
        *t = t.to_uppercase();
    }
    for key in ["ocr_quality_mean", "ocr_quality_sd"] {
        if fields.get(key).is_some_and(|v| v.as_str() == Some("")) {
            fields.insert(key.into(), Value::from(0));
        }
    }
}

/// Turns cached records into fixtures for one run.
struct FixtureBuilder<'a> {
    now: &'a str,
    allow_null: bool,
    index: ForeignKeyIndex,
}

impl FixtureBuilder<'_> {
    fn fixture(&self, kind: EntityKind, pk: u64, mut fields: Map<String, Value>) -> Result<Fixture, PipelineError> {
        self.index.translate_fields(&mut fields, self.allow_null)?;
        normalize_fields(&mut fields, self.now);
        Ok(Fixture {
            pk,
            model: kind.model().to_string(),
            fields,
        })
    }

    /// One fixture per file, keeping the first file for each `uniq_keys` value.
    fn build_all(&self, kind: EntityKind, paths: &[PathBuf], uniq_keys: &[&str]) -> Result<Vec<Fixture>> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for path in paths {
            let fields = read_record(path)?;
            if !uniq_keys.is_empty() {
                let key = uniq_keys
                    .iter()
                    .map(|k| {
                        let part = key_part(fields.get(*k));
                        if part.is_empty() {
                            warn!("Could not find key {} in {}", k, path.display());
                        }
                        part
                    })
                    .collect::<Vec<_>>()
                    .join("-");
                if !seen.insert(key) {
                    continue;
                }
            }
            let pk = out.len() as u64 + 1;
            let fixture = self
                .fixture(kind, pk, fields)
                .with_context(|| format!("Failed to build fixture from {}", path.display()))?;
            out.push(fixture);
        }
        Ok(out)
    }

    /// Stream item logs into `writer`, numbering lines across files.
    fn items_into(&self, logs: &[PathBuf], writer: &mut ShardWriter) -> Result<()> {
        let pb = util::progress_bar(logs.len() as u64, "items")?;
        let mut pk = 0u64;
        for log in logs {
            let body = fs::read_to_string(log).with_context(|| format!("Failed to read {}", log.display()))?;
            for (n, line) in body.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
                let source = format!("{}:{}", log.display(), n + 1);
                let value: Value = serde_json::from_str(line)
                    .with_context(|| format!("Cannot interpret JSON at {}", source))?;
                pk += 1;
                let fixture = self
                    .fixture(EntityKind::Item, pk, as_record(value, &source)?)
                    .with_context(|| format!("Failed to build fixture from {}", source))?;
                writer.push(fixture)?;
            }
            pb.inc(1);
        }
        pb.finish_and_clear();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ParseSummary {
    pub json_files: usize,
    pub jsonl_files: usize,
    pub shards: BTreeMap<&'static str, ShardStats>,
}

impl ParseSummary {
    pub fn print(&self) {
        println!(
            "Parsed {} JSON and {} JSONL cache files.",
            self.json_files, self.jsonl_files
        );
        for (prefix, stats) in &self.shards {
            println!(
                "  {:<13} {:>10} fixtures in {} files",
                prefix,
                stats.records,
                stats.files.len()
            );
        }
    }
}

/// Ask before deleting `*.json` in the fixture directory; always leaves it existing.
/// Returns how many files were removed.
pub fn reset_fixture_dir(output: &Path, assume_yes: bool) -> Result<usize> {
    fs::create_dir_all(output).with_context(|| format!("Failed to create {}", output.display()))?;
    let stale: Vec<PathBuf> = fs::read_dir(output)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "json"))
        .collect();
    if stale.is_empty() {
        return Ok(0);
    }
    let prompt = format!(
        "This will empty the fixture directory ({}, {} JSON files). Proceed?",
        output.display(),
        stale.len()
    );
    if !confirm(&prompt, assume_yes)? {
        info!("Keeping existing fixtures in {}", output.display());
        return Ok(0);
    }
    for path in &stale {
        fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(stale.len())
}

/// Convert the cached trees of the configured collections into fixtures under `settings.output`.
pub fn parse(settings: &Settings, now: &str) -> Result<ParseSummary> {
    let files = CacheFiles::discover(settings)?;
    let mut summary = ParseSummary {
        jsonl_files: files.of(EntityKind::Item).len(),
        json_files: NESTED_KINDS
            .iter()
            .chain([EntityKind::Newspaper].iter())
            .map(|k| files.of(*k).len())
            .sum(),
        ..Default::default()
    };
    info!(
        "{} JSON and {} JSONL cache files",
        summary.json_files, summary.jsonl_files
    );

    let mut builder = FixtureBuilder {
        now,
        allow_null: settings.allow_null_relations,
        index: ForeignKeyIndex::default(),
    };

    let data_providers = builder.build_all(EntityKind::DataProvider, files.of(EntityKind::DataProvider), &["name"])?;
    let ingests = builder.build_all(
        EntityKind::Ingest,
        files.of(EntityKind::Ingest),
        &["lwm_tool_name", "lwm_tool_version"],
    )?;
    let digitisations = builder.build_all(EntityKind::Digitisation, files.of(EntityKind::Digitisation), &["software"])?;
    let newspapers = builder.build_all(EntityKind::Newspaper, files.of(EntityKind::Newspaper), &[])?;

    builder
        .index
        .register("newspaper", "publication_code", &newspapers, &["publication_code"])?;
    let issues = builder.build_all(EntityKind::Issue, files.of(EntityKind::Issue), &[])?;

    builder.index.register("issue", "issue_code", &issues, &["issue_code"])?;
    builder.index.register("digitisation", "software", &digitisations, &["software"])?;
    builder.index.register("data_provider", "name", &data_providers, &["name"])?;
    builder.index.register(
        "ingest",
        "lwm_tool_identifier",
        &ingests,
        &["lwm_tool_name", "lwm_tool_version"],
    )?;

    let out = &settings.output;
    let max = settings.max_elements_per_file;
    fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;

    for (kind, fixtures) in [
        (EntityKind::Newspaper, newspapers),
        (EntityKind::Issue, issues),
        (EntityKind::Digitisation, digitisations),
        (EntityKind::Ingest, ingests),
        (EntityKind::DataProvider, data_providers),
    ] {
        let stats = save_all(out, kind.prefix(), max, fixtures)?;
        info!("Saved {} {} fixtures", stats.records, kind.prefix());
        summary.shards.insert(kind.prefix(), stats);
    }

    let mut writer = ShardWriter::new(out, EntityKind::Item.prefix(), max);
    builder.items_into(files.of(EntityKind::Item), &mut writer)?;
    let stats = writer.finish()?;
    info!("Saved {} Item fixtures", stats.records);
    summary.shards.insert(EntityKind::Item.prefix(), stats);

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::write_zip;
    use crate::entity::extract::sample_document;
    use crate::reference::providers::ProviderTable;
    use crate::router;
    use crate::settings::test_settings;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const NOW: &str = "2024-01-01 00:00:00.000000+00:00";

    fn routed(tmp: &TempDir, docs: &[(&str, Vec<String>)]) -> Settings {
        let settings = test_settings(tmp.path());
        fs::write(
            &settings.jisc_papers_csv,
            "Newspaper Title,NLP,Abbr,StartD,StartM,StartY,EndD,EndM,EndY\n\
             Example Gazette,999,ABCD,1,Jan,1700,31,Dec,1701\n",
        )
        .unwrap();
        for (zip_name, contents) in docs {
            let names: Vec<String> = (0..contents.len()).map(|i| format!("{}.xml", i)).collect();
            let entries: Vec<(&str, &str)> = names
                .iter()
                .zip(contents)
                .map(|(n, d)| (n.as_str(), d.as_str()))
                .collect();
            write_zip(&settings.collection_dir("hmd").join(zip_name), &entries);
        }
        router::route(&settings, &ProviderTable::new("legacy_code")).unwrap();
        settings
    }

    fn sample(tmp: &TempDir) -> Settings {
        routed(
            tmp,
            &[
                (
                    "IPJL_metadata.zip",
                    vec![
                        sample_document("0002194", "Ipswich Journal", "0002194/1850/0101", "art0001"),
                        sample_document("0002194", "Ipswich Journal", "0002194/1850/0101", "art0002"),
                        sample_document("0002194", "Ipswich Journal", "0002194/1850/0101", "art0001"),
                    ],
                ),
                (
                    "ABCD_metadata.zip",
                    vec![
                        sample_document("0000123", "", "1850/0101", "art0001"),
                        sample_document("NCBL1001", "Northern Paper", "1850/0101", "art0001"),
                    ],
                ),
            ],
        )
    }

    fn load(dir: &Path, prefix: &str) -> Vec<Fixture> {
        let mut all = Vec::new();
        for n in 1.. {
            let path = dir.join(format!("{}-{}.json", prefix, n));
            if !path.exists() {
                break;
            }
            let shard: Vec<Fixture> = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
            all.extend(shard);
        }
        all
    }

    #[test]
    fn classifies_cache_paths() {
        assert_eq!(classify(Path::new("hmd/data-provider/x.json")), Some(EntityKind::DataProvider));
        assert_eq!(classify(Path::new("hmd/2/1/0002194/issues/a.json")), Some(EntityKind::Issue));
        assert_eq!(classify(Path::new("hmd/2/1/0002194/0002194.json")), Some(EntityKind::Newspaper));
        assert_eq!(classify(Path::new("hmd/2/1/0002194/items.jsonl")), Some(EntityKind::Item));
        assert_eq!(classify(Path::new("hmd/notes.txt")), None);
    }

    #[test]
    fn normalizes_fields() {
        let mut fields = serde_json::json!({"item_type": "article", "ocr_quality_mean": "", "ocr_quality_sd": 0.5})
            .as_object()
            .unwrap()
            .clone();
        normalize_fields(&mut fields, NOW);
        assert_eq!(fields["item_type"], "ARTICLE");
        assert_eq!(fields["ocr_quality_mean"], 0);
        assert_eq!(fields["ocr_quality_sd"], 0.5);
        assert_eq!(fields["created_at"], NOW);
        assert_eq!(fields["updated_at"], NOW);
    }

    #[test]
    fn end_to_end_foreign_keys_resolve() {
        let tmp = TempDir::new().unwrap();
        let settings = sample(&tmp);
        parse(&settings, NOW).unwrap();
        let out = &settings.output;

        let pks = |prefix: &str| -> HashSet<u64> { load(out, prefix).iter().map(|f| f.pk).collect() };
        let newspapers = pks("Newspaper");
        let issues = pks("Issue");
        let digitisations = pks("Digitisation");
        let ingests = pks("Ingest");
        let providers = pks("DataProvider");

        let items = load(out, "Item");
        assert_eq!(items.len(), 4);
        for item in &items {
            let f = &item.fields;
            assert_eq!(item.model, "newspapers.item");
            assert!(issues.contains(&f["issue_id"].as_u64().unwrap()));
            assert!(digitisations.contains(&f["digitisation_id"].as_u64().unwrap()));
            assert!(ingests.contains(&f["ingest_id"].as_u64().unwrap()));
            assert!(providers.contains(&f["data_provider_id"].as_u64().unwrap()));
            assert_eq!(f["item_type"], "ARTICLE");
            assert!(!f.keys().any(|k| k.contains("__")));
        }
        for issue in load(out, "Issue") {
            assert!(newspapers.contains(&issue.fields["newspaper_id"].as_u64().unwrap()));
        }
        assert_eq!(digitisations.len(), 1);
        assert_eq!(ingests.len(), 1);
        assert_eq!(providers.len(), 1);
    }

    #[test]
    fn repeated_collection_is_read_once() {
        let tmp = TempDir::new().unwrap();
        let mut settings = sample(&tmp);
        settings.collections = vec!["hmd".into(), "hmd".into()];
        let summary = parse(&settings, NOW).unwrap();
        assert_eq!(summary.shards["Item"].records, 4);
        assert_eq!(load(&settings.output, "Newspaper").len(), 3);
    }

    #[test]
    fn newspaper_codes_and_titles() {
        let tmp = TempDir::new().unwrap();
        let settings = sample(&tmp);
        parse(&settings, NOW).unwrap();

        let titles: HashMap<String, String> = load(&settings.output, "Newspaper")
            .into_iter()
            .map(|f| {
                let code = f.fields["publication_code"].as_str().unwrap().to_string();
                assert_eq!(code.len(), 7);
                assert!(code.chars().all(|c| c.is_ascii_digit()));
                (code, f.fields["title"].as_str().unwrap().to_string())
            })
            .collect();
        assert_eq!(titles["0000123"], "Example Gazette");
        assert_eq!(titles["0000499"], "Northern Paper");
        assert_eq!(titles["0002194"], "Ipswich Journal");
    }

    #[test]
    fn deterministic_across_runs() {
        let tmp = TempDir::new().unwrap();
        let settings = sample(&tmp);
        parse(&settings, NOW).unwrap();
        let first: Vec<Vec<Fixture>> = ["Newspaper", "Issue", "Item", "Ingest", "Digitisation", "DataProvider"]
            .iter()
            .map(|p| load(&settings.output, p))
            .collect();
        parse(&settings, NOW).unwrap();
        let second: Vec<Vec<Fixture>> = ["Newspaper", "Issue", "Item", "Ingest", "Digitisation", "DataProvider"]
            .iter()
            .map(|p| load(&settings.output, p))
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn shards_respect_max() {
        let tmp = TempDir::new().unwrap();
        let mut settings = sample(&tmp);
        settings.max_elements_per_file = 3;
        let summary = parse(&settings, NOW).unwrap();
        let items = &summary.shards["Item"];
        assert_eq!(items.records, 4);
        assert_eq!(items.files.len(), 2);
        for file in &items.files[..items.files.len() - 1] {
            let shard: Vec<Fixture> = serde_json::from_str(&fs::read_to_string(file).unwrap()).unwrap();
            assert!(shard.len() <= 3);
        }
    }

    #[test]
    fn missing_digitisation_is_fatal_unless_null_allowed() {
        let tmp = TempDir::new().unwrap();
        let doc = sample_document("0002194", "Ipswich Journal", "0002194/1850/0101", "art0001")
            .replace("<software>abbyy/1.0</software>", "");
        let mut settings = routed(&tmp, &[("IPJL_metadata.zip", vec![doc])]);

        let err = parse(&settings, NOW).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Translation { .. })
        ));

        settings.allow_null_relations = true;
        parse(&settings, NOW).unwrap();
        let items = load(&settings.output, "Item");
        assert!(items[0].fields["digitisation_id"].is_null());
    }

    #[test]
    fn unknown_software_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let settings = sample(&tmp);
        let log = settings.collection_cache("hmd").join("2/1/0002194/items.jsonl");
        let body = fs::read_to_string(&log).unwrap().replace("abbyy---1.0", "tesseract---5");
        fs::write(&log, body).unwrap();
        let err = parse(&settings, NOW).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Translation { .. })
        ));
    }

    #[test]
    fn reset_respects_answer() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("Item-1.json"), "[]").unwrap();
        fs::write(tmp.path().join("keep.txt"), "").unwrap();
        assert_eq!(reset_fixture_dir(tmp.path(), true).unwrap(), 1);
        assert!(!tmp.path().join("Item-1.json").exists());
        assert!(tmp.path().join("keep.txt").exists());
    }
}
