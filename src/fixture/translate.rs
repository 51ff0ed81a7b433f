//! Natural key → primary key lookups used to rewrite relational fields.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::Fixture;
use crate::error::PipelineError;

/// Relational cache fields are named `relation__field`.
pub const RELATION_SEPARATOR: &str = "__";

/// Relational values use `---` where the parent's natural key has `/`.
const ENCODED_SLASH: &str = "---";

#[derive(Debug, Default)]
pub struct ForeignKeyIndex {
    keys: HashMap<(String, String), HashMap<String, u64>>,
}

/// String form of a JSON scalar, `""` for null or a missing value.
pub fn key_part(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

impl ForeignKeyIndex {
    /// Index `fixtures` under `(relation, field)` by their `key_fields` joined with `-`.
    pub fn register(
        &mut self,
        relation: &str,
        field: &str,
        fixtures: &[Fixture],
        key_fields: &[&str],
    ) -> Result<(), PipelineError> {
        let lookup = self
            .keys
            .entry((relation.to_string(), field.to_string()))
            .or_default();
        for fixture in fixtures {
            let key = key_fields
                .iter()
                .map(|f| key_part(fixture.fields.get(*f)))
                .collect::<Vec<_>>()
                .join("-");
            if let Some(&first) = lookup.get(&key) {
                if first != fixture.pk {
                    return Err(PipelineError::DuplicateRelated {
                        relation: relation.to_string(),
                        field: field.to_string(),
                        key,
                        first,
                        second: fixture.pk,
                    });
                }
                continue;
            }
            lookup.insert(key, fixture.pk);
        }
        Ok(())
    }

    pub fn resolve(&self, relation: &str, field: &str, key: &str) -> Result<u64, PipelineError> {
        self.keys
            .get(&(relation.to_string(), field.to_string()))
            .and_then(|lookup| lookup.get(key))
            .copied()
            .ok_or_else(|| PipelineError::Translation {
                relation: relation.to_string(),
                field: field.to_string(),
                value: key.to_string(),
            })
    }

    /// Replace every `relation__field` entry with `relation_id` holding the parent's pk.
    ///
    /// An empty or missing value becomes `null` only when `allow_null` is set.
    pub fn translate_fields(
        &self,
        fields: &mut Map<String, Value>,
        allow_null: bool,
    ) -> Result<(), PipelineError> {
        let relational: Vec<String> = fields
            .keys()
            .filter(|k| k.contains(RELATION_SEPARATOR))
            .cloned()
            .collect();

        for key in relational {
            let Some((relation, field)) = key.split_once(RELATION_SEPARATOR) else {
                continue;
            };
            let raw = key_part(fields.remove(&key).as_ref());
            let pk = if raw.is_empty() {
                if !allow_null {
                    return Err(PipelineError::Translation {
                        relation: relation.to_string(),
                        field: field.to_string(),
                        value: raw,
                    });
                }
                Value::Null
            } else {
                let decoded = raw.replace(ENCODED_SLASH, "/");
                match self.resolve(relation, field, &decoded) {
                    Ok(pk) => Value::from(pk),
                    Err(_) if allow_null => Value::Null,
                    Err(e) => return Err(e),
                }
            };
            fields.insert(format!("{}_id", relation), pk);
        }
        Ok(())
    }
}
