use std::collections::HashSet;
use std::path::PathBuf;
#[cfg(test)]
use std::path::Path;

use anyhow::Result;
use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

const ENV_PREFIX: &str = "A2F";

/// Run configuration. Built once in `main`, then only borrowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub mountpoint: PathBuf,
    pub output: PathBuf,
    pub collections: Vec<String>,
    pub cache_home: PathBuf,
    pub jisc_papers_csv: PathBuf,
    pub report_dir: PathBuf,
    pub fixture_tables_output: PathBuf,
    pub max_elements_per_file: usize,
    pub start_with_largest: bool,
    pub allow_null_relations: bool,
    pub data_provider_index: String,
}

impl Settings {
    /// Defaults layered under `A2F_*` environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(Environment::with_prefix(ENV_PREFIX))
    }

    fn load_from(env: Environment) -> Result<Self> {
        let mut settings = Config::builder()
            .set_default("mountpoint", "./input/alto2txt/")?
            .set_default("output", "./output/fixtures/")?
            .set_default("collections", vec!["hmd", "lwm", "jisc", "bna"])?
            .set_default("cache_home", "./cache/")?
            .set_default("jisc_papers_csv", "./input/JISC papers.csv")?
            .set_default("report_dir", "./output/reports/")?
            .set_default("fixture_tables_output", "./output/tables/")?
            .set_default("max_elements_per_file", 2_000_000i64)?
            .set_default("start_with_largest", false)?
            .set_default("allow_null_relations", false)?
            .set_default("data_provider_index", "legacy_code")?
            .add_source(
                env.try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("collections"),
            )
            .build()?
            .try_deserialize::<Settings>()?;
        settings.normalize_collections();
        Ok(settings)
    }

    /// Trimmed, lower-cased collection names, each kept once in first-seen order.
    pub fn normalize_collections(&mut self) {
        let mut seen = HashSet::new();
        self.collections = self
            .collections
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty() && seen.insert(c.clone()))
            .collect();
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_elements_per_file == 0 {
            return Err(PipelineError::Config(
                "max_elements_per_file must be at least 1".into(),
            ));
        }
        if self.collections.is_empty() {
            return Err(PipelineError::Config("no collections configured".into()));
        }
        if !matches!(self.data_provider_index.as_str(), "legacy_code" | "code" | "name") {
            return Err(PipelineError::Config(format!(
                "unknown data provider index field: {}",
                self.data_provider_index
            )));
        }
        Ok(())
    }

    /// Where the metadata ZIPs for `collection` are expected to be mounted.
    pub fn collection_dir(&self, collection: &str) -> PathBuf {
        self.mountpoint
            .join(format!("{}-alto2txt", collection))
            .join("metadata")
    }

    pub fn collection_cache(&self, collection: &str) -> PathBuf {
        self.cache_home.join(collection)
    }

    /// (setting, value) pairs for the setup table.
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("COLLECTIONS", format!("{:?}", self.collections)),
            ("OUTPUT", self.output.display().to_string()),
            ("CACHE_HOME", self.cache_home.display().to_string()),
            ("MOUNTPOINT", self.mountpoint.display().to_string()),
            ("JISC_PAPERS_CSV", self.jisc_papers_csv.display().to_string()),
            ("REPORT_DIR", self.report_dir.display().to_string()),
            ("FIXTURE_TABLES_OUTPUT", self.fixture_tables_output.display().to_string()),
            ("MAX_ELEMENTS_PER_FILE", self.max_elements_per_file.to_string()),
            ("START_WITH_LARGEST", self.start_with_largest.to_string()),
            ("ALLOW_NULL_RELATIONS", self.allow_null_relations.to_string()),
            ("DATA_PROVIDER_INDEX", self.data_provider_index.clone()),
        ]
    }

    pub fn print(&self) {
        let rows = self.rows();
        let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        println!("alto2fixture setup");
        println!("{}", "-".repeat(width + 40));
        for (key, value) in rows {
            println!("{:>width$} | {}", key, value, width = width);
        }
        println!();
    }
}

#[cfg(test)]
pub(crate) fn test_settings(root: &Path) -> Settings {
    Settings {
        mountpoint: root.join("mnt"),
        output: root.join("fixtures"),
        collections: vec!["hmd".into()],
        cache_home: root.join("cache"),
        jisc_papers_csv: root.join("jisc.csv"),
        report_dir: root.join("reports"),
        fixture_tables_output: root.join("tables"),
        max_elements_per_file: 100,
        start_with_largest: false,
        allow_null_relations: false,
        data_provider_index: "legacy_code".into(),
    }
}
