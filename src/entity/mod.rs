//! Records extracted from one metadata document, before they get primary keys.

pub mod cache;
pub mod extract;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::PipelineError;

pub const ITEM_LOG: &str = "items.jsonl";
pub const ISSUES_DIR: &str = "issues";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    DataProvider,
    Digitisation,
    Ingest,
    Newspaper,
    Issue,
    Item,
}

impl EntityKind {
    /// Directory holding the cache files of kinds that are not nested under a newspaper.
    pub fn dir_name(self) -> Option<&'static str> {
        match self {
            EntityKind::DataProvider => Some("data-provider"),
            EntityKind::Digitisation => Some("digitisation"),
            EntityKind::Ingest => Some("ingest"),
            EntityKind::Issue => Some(ISSUES_DIR),
            EntityKind::Newspaper | EntityKind::Item => None,
        }
    }

    pub fn model(self) -> &'static str {
        match self {
            EntityKind::DataProvider => "newspapers.dataprovider",
            EntityKind::Digitisation => "newspapers.digitisation",
            EntityKind::Ingest => "newspapers.ingest",
            EntityKind::Newspaper => "newspapers.newspaper",
            EntityKind::Issue => "newspapers.issue",
            EntityKind::Item => "newspapers.item",
        }
    }

    /// Fixture file prefix.
    pub fn prefix(self) -> &'static str {
        match self {
            EntityKind::DataProvider => "DataProvider",
            EntityKind::Digitisation => "Digitisation",
            EntityKind::Ingest => "Ingest",
            EntityKind::Newspaper => "Newspaper",
            EntityKind::Issue => "Issue",
            EntityKind::Item => "Item",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataProvider {
    pub name: String,
    pub code: String,
    pub legacy_code: Option<String>,
    pub source_note: String,
    pub collection: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Digitisation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xml_flavour: Option<String>,
    pub software: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mets_namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alto_namespace: Option<String>,
}

impl Digitisation {
    /// `software` made safe for use as a file name.
    pub fn id(&self) -> String {
        self.software.replace('/', "---")
    }
}

/// `lwm_tool_*` fields of the process block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Ingest {
    pub fields: BTreeMap<String, String>,
}

impl Ingest {
    pub fn id(&self) -> Result<String, PipelineError> {
        let part = |key: &str| {
            self.fields
                .get(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| PipelineError::Resolution {
                    what: "ingest identifier",
                    detail: format!("missing {}", key),
                })
        };
        Ok(format!("{}-{}", part("lwm_tool_name")?, part("lwm_tool_version")?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Newspaper {
    pub publication_code: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub issue_code: String,
    pub issue_date: String,
    #[serde(rename = "newspaper__publication_code")]
    pub publication_code: String,
    pub input_sub_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Item {
    pub item_code: String,
    pub word_count: i64,
    pub title: String,
    pub item_type: Option<String>,
    pub input_filename: String,
    pub ocr_quality_mean: f64,
    pub ocr_quality_sd: f64,
    #[serde(rename = "digitisation__software")]
    pub digitisation: Option<String>,
    #[serde(rename = "ingest__lwm_tool_identifier")]
    pub ingest: String,
    #[serde(rename = "issue__issue_code")]
    pub issue: String,
    #[serde(rename = "data_provider__name")]
    pub data_provider: String,
    #[serde(skip)]
    pub publication_code: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    DataProvider(DataProvider),
    Digitisation(Digitisation),
    Ingest(Ingest),
    Newspaper(Newspaper),
    Issue(Issue),
    Item(Item),
}

/// Two-level fan-out directories for a publication code: its first two
/// significant digits, `0`-padded on the left.
pub fn number_paths(publication_code: &str) -> [String; 2] {
    let digits: Vec<char> = publication_code.trim_start_matches('0').chars().take(2).collect();
    match digits.as_slice() {
        [a, b] => [a.to_string(), b.to_string()],
        [a] => ["0".to_string(), a.to_string()],
        _ => ["0".to_string(), "0".to_string()],
    }
}

fn newspaper_dir(collection_root: &Path, publication_code: &str) -> PathBuf {
    let [a, b] = number_paths(publication_code);
    collection_root.join(a).join(b).join(publication_code)
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::DataProvider(_) => EntityKind::DataProvider,
            Entity::Digitisation(_) => EntityKind::Digitisation,
            Entity::Ingest(_) => EntityKind::Ingest,
            Entity::Newspaper(_) => EntityKind::Newspaper,
            Entity::Issue(_) => EntityKind::Issue,
            Entity::Item(_) => EntityKind::Item,
        }
    }

    pub fn identity(&self) -> Result<String, PipelineError> {
        Ok(match self {
            Entity::DataProvider(d) => d.name.clone(),
            Entity::Digitisation(d) => d.id(),
            Entity::Ingest(i) => i.id()?,
            Entity::Newspaper(n) => n.publication_code.clone(),
            Entity::Issue(i) => i.issue_code.clone(),
            Entity::Item(i) => i.item_code.clone(),
        })
    }

    /// Cache location under `{cache_home}/{collection}`.
    pub fn cache_path(&self, collection_root: &Path) -> Result<PathBuf, PipelineError> {
        let path = match self {
            Entity::Newspaper(n) => newspaper_dir(collection_root, &n.publication_code)
                .join(format!("{}.json", n.publication_code)),
            Entity::Issue(i) => newspaper_dir(collection_root, &i.publication_code)
                .join(ISSUES_DIR)
                .join(format!("{}.json", i.issue_code)),
            Entity::Item(i) => newspaper_dir(collection_root, &i.publication_code).join(ITEM_LOG),
            other => {
                let dir = other.kind().dir_name().unwrap_or_default();
                collection_root
                    .join(dir)
                    .join(format!("{}.json", other.identity()?))
            }
        };
        Ok(path)
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            Entity::DataProvider(x) => serde_json::to_value(x),
            Entity::Digitisation(x) => serde_json::to_value(x),
            Entity::Ingest(x) => serde_json::to_value(x),
            Entity::Newspaper(x) => serde_json::to_value(x),
            Entity::Issue(x) => serde_json::to_value(x),
            Entity::Item(x) => serde_json::to_value(x),
        }
    }

    /// Field projection written to the cache.
    pub fn fields(&self) -> Result<Map<String, Value>> {
        match self.to_value()? {
            Value::Object(map) => Ok(map),
            other => Err(PipelineError::structure(
                format!("{:?} entity", self.kind()),
                format!("projected to non-object {}", other),
            )
            .into()),
        }
    }
}
