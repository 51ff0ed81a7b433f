use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};

use crate::util::{self, warn_once};

pub const COLLECTION_TYPE: &str = "newspapers";
pub const DATA_PROVIDER_MODEL: &str = "newspapers.dataprovider";

/// A known source of digitised newspapers.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderRecord {
    pub pk: u64,
    pub name: &'static str,
    pub code: &'static str,
    pub legacy_code: &'static str,
    pub collection: &'static str,
    pub source_note: &'static str,
}

pub const NEWSPAPER_COLLECTION_METADATA: &[ProviderRecord] = &[
    ProviderRecord {
        pk: 1,
        name: "FindMyPast",
        code: "fmp",
        legacy_code: "bna",
        collection: COLLECTION_TYPE,
        source_note: "FindMyPast-funded digitised newspapers provided by the British Newspaper Archive",
    },
    ProviderRecord {
        pk: 2,
        name: "Heritage Made Digital",
        code: "bl-hmd",
        legacy_code: "hmd",
        collection: COLLECTION_TYPE,
        source_note: "British Library-funded digitised newspapers provided by the British Newspaper Archive",
    },
    ProviderRecord {
        pk: 3,
        name: "Joint Information Systems Committee",
        code: "jisc",
        legacy_code: "jisc",
        collection: COLLECTION_TYPE,
        source_note: "JISC-funded digitised newspapers provided by the British Newspaper Archive",
    },
    ProviderRecord {
        pk: 4,
        name: "Living with Machines",
        code: "bl_lwm",
        legacy_code: "lwm",
        collection: COLLECTION_TYPE,
        source_note: "Living with Machines-funded digitised newspapers provided by the British Newspaper Archive",
    },
];

const FIELD_NAMES: &[&str] = &["name", "code", "legacy_code", "collection", "source_note"];

impl ProviderRecord {
    fn field(&self, name: &str) -> Option<&'static str> {
        match name {
            "name" => Some(self.name),
            "code" => Some(self.code),
            "legacy_code" => Some(self.legacy_code),
            "collection" => Some(self.collection),
            "source_note" => Some(self.source_note),
            _ => None,
        }
    }

    fn values(&self) -> Vec<&'static str> {
        FIELD_NAMES.iter().filter_map(|f| self.field(f)).collect()
    }
}

/// The static provider table indexed by one of its fields.
pub struct ProviderTable {
    records: &'static [ProviderRecord],
    index_field: String,
}

impl ProviderTable {
    pub fn new(index_field: &str) -> Self {
        ProviderTable {
            records: NEWSPAPER_COLLECTION_METADATA,
            index_field: index_field.to_string(),
        }
    }

    /// Record whose index field equals `collection`.
    pub fn lookup(&self, collection: &str) -> Option<&'static ProviderRecord> {
        self.records
            .iter()
            .find(|r| r.field(&self.index_field) == Some(collection))
    }

    /// Configured collections with no provider record. Warns once per run.
    pub fn unmatched_collections(&self, collections: &[String]) -> BTreeSet<String> {
        let diff: BTreeSet<String> = collections
            .iter()
            .filter(|c| self.lookup(c).is_none())
            .cloned()
            .collect();
        if !diff.is_empty() {
            warn_once(
                "unmatched-collections",
                &format!(
                    "{} `collections` not in `newspaper_collections`: {:?}",
                    diff.len(),
                    diff
                ),
            );
        }
        diff
    }

    pub fn print(&self) {
        println!("dataprovider");
        println!(
            "{:>3} | {:<36} | {:<7} | {:<11} | {:<10} | {}",
            "pk", "name", "code", "legacy_code", "collection", "source_note"
        );
        println!("{}", "-".repeat(110));
        for r in self.records {
            println!(
                "{:>3} | {:<36} | {:<7} | {:<11} | {:<10} | {}",
                r.pk, r.name, r.code, r.legacy_code, r.collection, r.source_note
            );
        }
        println!();
    }

    /// Write the table as a fixture JSON file and a CSV twin. Returns both paths.
    pub fn export(&self, dir: &Path, created_at: &str) -> Result<Vec<PathBuf>> {
        let stem = "test-dataprovider-000001";
        let json_path = dir.join(format!("{}.json", stem));
        let csv_path = dir.join(format!("{}.csv", stem));

        let records: Vec<Value> = self
            .records
            .iter()
            .map(|r| {
                json!({
                    "pk": r.pk,
                    "model": DATA_PROVIDER_MODEL,
                    "fields": {
                        "name": r.name,
                        "code": r.code,
                        "legacy_code": r.legacy_code,
                        "collection": r.collection,
                        "source_note": r.source_note,
                        "created_at": created_at,
                        "updated_at": created_at,
                    }
                })
            })
            .collect();
        util::write_json(&json_path, &records)?;

        let mut wtr = csv::Writer::from_path(&csv_path)
            .with_context(|| format!("Failed to create {}", csv_path.display()))?;
        let mut header = vec!["pk"];
        header.extend_from_slice(FIELD_NAMES);
        wtr.write_record(&header)?;
        for r in self.records {
            let pk = r.pk.to_string();
            let mut row = vec![pk.as_str()];
            row.extend(r.values());
            wtr.write_record(&row)?;
        }
        wtr.flush()?;

        Ok(vec![json_path, csv_path])
    }
}
