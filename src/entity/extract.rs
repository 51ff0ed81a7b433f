use std::collections::BTreeMap;

use anyhow::Result;

use super::{DataProvider, Digitisation, Entity, Ingest, Issue, Item, Newspaper};
use crate::error::PipelineError;
use crate::reference::jisc::JiscPapers;
use crate::reference::providers::{ProviderTable, COLLECTION_TYPE};
use crate::reference::single_publication_code;
use crate::util::{slugify, warn_once};
use crate::xml::XmlNode;

const MAX_ITEM_TITLE_CHARS: usize = 2_097_151;

/// Source codes known to be malformed, with the code to fall back to when
/// `input_sub_path` carries no single publication code.
const PUBLICATION_CODE_FALLBACKS: &[(&str, &str)] = &[
    ("NCBL1001", "0000499"),
    ("NCBL1002", "0000499"),
    ("NCBL1023", "0000152"),
    ("NCBL1024", "0000171"),
    ("NCBL1029", "0000165"),
    ("NCBL1034", "0000160"),
    ("NCBL1035", "0000185"),
];

const ITEM_FIELDS: &[&str] = &[
    "title",
    "word_count",
    "ocr_quality_mean",
    "ocr_quality_sd",
    "plain_text_file",
    "item_type",
];

const DIGITISATION_FIELDS: &[&str] = &["xml_flavour", "software", "mets_namespace", "alto_namespace"];

/// Run-wide inputs shared by every document of one archive.
pub struct DocumentContext<'a> {
    pub collection: &'a str,
    pub zip_file: Option<&'a str>,
    pub jisc: Option<&'a JiscPapers>,
    pub providers: &'a ProviderTable,
}

/// Everything one metadata document yields.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub newspaper: Newspaper,
    pub issue: Issue,
    pub item: Item,
    pub data_provider: DataProvider,
    pub ingest: Ingest,
    pub digitisation: Option<Digitisation>,
}

impl Extracted {
    /// Entities in cache-write order. A missing digitisation block is skipped.
    pub fn into_entities(self) -> Vec<Entity> {
        let mut out = vec![
            Entity::Item(self.item),
            Entity::Newspaper(self.newspaper),
            Entity::Issue(self.issue),
            Entity::DataProvider(self.data_provider),
            Entity::Ingest(self.ingest),
        ];
        if let Some(d) = self.digitisation {
            out.push(Entity::Digitisation(d));
        }
        out
    }
}

fn required<'a>(node: &'a XmlNode, path: &str) -> Result<&'a XmlNode, PipelineError> {
    node.find(path)
        .ok_or_else(|| PipelineError::structure("metadata document", format!("missing <{}>", path)))
}

fn from_sub_path(input_sub_path: &str, failure: &str) -> Result<String, PipelineError> {
    single_publication_code(input_sub_path).ok_or_else(|| PipelineError::Resolution {
        what: "publication code",
        detail: format!("{} (input_sub_path {:?})", failure, input_sub_path),
    })
}

/// Seven-digit publication code for a document.
///
/// Starts from the `publication@id` attribute. Known malformed ids are
/// recovered from `input_sub_path` or fall back to a fixed code; other short
/// or `NCBL` ids must be recoverable from `input_sub_path`.
pub fn resolve_publication_code(id: Option<&str>, input_sub_path: &str) -> Result<String> {
    let mut code = id.unwrap_or_default().to_string();

    if let Some((_, fallback)) = PUBLICATION_CODE_FALLBACKS.iter().find(|(bad, _)| *bad == code) {
        code = single_publication_code(input_sub_path).unwrap_or_else(|| fallback.to_string());
    } else if code.contains("NCBL") || code.len() == 4 {
        code = from_sub_path(input_sub_path, "publication code look-up failed")?;
    }

    if code.is_empty() {
        code = from_sub_path(input_sub_path, "no publication id and no code in path")?;
    }

    let code = format!("{:0>7}", code);
    if code.len() != 7 || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(PipelineError::Resolution {
            what: "publication code",
            detail: format!("{:?} is not a 7-digit code", code),
        }
        .into());
    }
    Ok(code)
}

fn clean_title(raw: &str) -> String {
    raw.trim_end_matches('.')
        .trim()
        .trim_end_matches(':')
        .trim()
        .to_string()
}

fn resolve_title(
    publication: &XmlNode,
    issue_date: &str,
    input_sub_path: &str,
    ctx: &DocumentContext,
) -> Result<String> {
    let title = publication.find_text("title").map(clean_title).unwrap_or_default();
    if !title.is_empty() {
        return Ok(title);
    }

    let Some(zip_file) = ctx.zip_file else {
        warn_once(
            "jisc-no-zip-file",
            "JISC title lookup needs the archive file name; leaving title empty",
        );
        return Ok(String::new());
    };
    let Some(jisc) = ctx.jisc else {
        warn_once(
            "jisc-no-table",
            "JISC title lookup needs the JISC papers table; leaving title empty",
        );
        return Ok(String::new());
    };
    let abbr = zip_file.split('_').next().unwrap_or_default();
    jisc.resolve_title(issue_date, input_sub_path, abbr)
}

/// DataProvider for `collection`, synthesised when the static table has no match.
pub fn data_provider_for(collection: &str, providers: &ProviderTable) -> DataProvider {
    match providers.lookup(collection) {
        Some(r) => DataProvider {
            name: r.name.to_string(),
            code: r.code.to_string(),
            legacy_code: Some(r.legacy_code.to_string()),
            source_note: r.source_note.to_string(),
            collection: r.collection.to_string(),
        },
        None => DataProvider {
            name: collection.to_string(),
            code: slugify(collection),
            legacy_code: None,
            source_note: String::new(),
            collection: COLLECTION_TYPE.to_string(),
        },
    }
}

fn child_texts<'a>(node: &'a XmlNode, keep: &[&str]) -> BTreeMap<&'a str, &'a str> {
    node.children
        .iter()
        .filter(|c| keep.contains(&c.tag.as_str()))
        .map(|c| (c.tag.as_str(), c.text.as_str()))
        .collect()
}

fn parse_or_zero<T: std::str::FromStr + Default>(raw: Option<&str>, what: &str) -> Result<T> {
    match raw.map(str::trim) {
        None | Some("") => Ok(T::default()),
        Some(s) => s
            .parse()
            .map_err(|_| PipelineError::structure("item", format!("bad {} {:?}", what, s)).into()),
    }
}

/// Derive every entity described by one parsed metadata document.
pub fn extract(root: &XmlNode, ctx: &DocumentContext) -> Result<Extracted> {
    if root.child("publication").is_none() || root.child("process").is_none() {
        return Err(PipelineError::structure(
            format!("<{}>", root.tag),
            "expected a metadata document root with <publication> and <process>",
        )
        .into());
    }

    let publication = required(root, "publication")?;
    let process = required(root, "process")?;
    let input_sub_path = required(process, "input_sub_path")?.text.clone();
    let issue_date = required(publication, "issue/date")?.text.clone();

    let publication_code = resolve_publication_code(publication.attr("id"), &input_sub_path)?;
    let newspaper = Newspaper {
        title: resolve_title(publication, &issue_date, &input_sub_path, ctx)?,
        location: publication.find_text("location").map(str::to_string),
        publication_code: publication_code.clone(),
    };

    let issue = Issue {
        issue_code: format!("{}-{}", publication_code, issue_date.replace('-', "")),
        issue_date,
        publication_code: publication_code.clone(),
        input_sub_path,
    };

    let ingest = Ingest {
        fields: process
            .find("lwm_tool")
            .map(|tool| {
                tool.children
                    .iter()
                    .map(|c| (format!("lwm_tool_{}", c.tag), c.text.clone()))
                    .collect()
            })
            .unwrap_or_default(),
    };

    let digi = child_texts(process, DIGITISATION_FIELDS);
    let digitisation = digi
        .get("software")
        .filter(|s| !s.is_empty())
        .map(|software| Digitisation {
            xml_flavour: digi.get("xml_flavour").map(|s| s.to_string()),
            software: software.to_string(),
            mets_namespace: digi.get("mets_namespace").map(|s| s.to_string()),
            alto_namespace: digi.get("alto_namespace").map(|s| s.to_string()),
        });

    let data_provider = data_provider_for(ctx.collection, ctx.providers);

    let item_elem = required(publication, "issue/item")?;
    let item_id = item_elem
        .attr("id")
        .ok_or_else(|| PipelineError::structure("<item>", "missing id attribute"))?;
    let fields = child_texts(item_elem, ITEM_FIELDS);
    let item = Item {
        item_code: format!("{}-{}", issue.issue_code, item_id),
        word_count: parse_or_zero(fields.get("word_count").copied(), "word_count")?,
        title: fields
            .get("title")
            .map(|t| t.chars().take(MAX_ITEM_TITLE_CHARS).collect())
            .unwrap_or_default(),
        item_type: fields.get("item_type").map(|s| s.to_string()),
        input_filename: fields.get("plain_text_file").map(|s| s.to_string()).unwrap_or_default(),
        ocr_quality_mean: parse_or_zero(fields.get("ocr_quality_mean").copied(), "ocr_quality_mean")?,
        ocr_quality_sd: parse_or_zero(fields.get("ocr_quality_sd").copied(), "ocr_quality_sd")?,
        digitisation: digitisation.as_ref().map(Digitisation::id),
        ingest: ingest.id()?,
        issue: issue.issue_code.clone(),
        data_provider: data_provider.name.clone(),
        publication_code,
    };

    Ok(Extracted {
        newspaper,
        issue,
        item,
        data_provider,
        ingest,
        digitisation,
    })
}

/// Metadata document shaped like alto2txt output, for tests across the crate.
#[cfg(test)]
pub(crate) fn sample_document(pub_id: &str, title: &str, sub_path: &str, item_id: &str) -> String {
    let title = if title.is_empty() {
        String::new()
    } else {
        format!("<title>{}</title>", title)
    };
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<lwm>
  <process>
<lwm_tool><name>extract_text</name><version>0.4.1</version></lwm_tool>
<source_type>newspaper</source_type>
<xml_flavour>bln</xml_flavour>
<software>abbyy/1.0</software>
<input_sub_path>{sub_path}</input_sub_path>
  </process>
  <publication id="{pub_id}">
{title}
<location>Ipswich</location>
<issue id="issue-1">
  <date>1850-01-01</date>
  <item id="{item_id}">
    <title>Local news</title>
    <word_count>321</word_count>
    <ocr_quality_mean>0.92</ocr_quality_mean>
    <ocr_quality_sd></ocr_quality_sd>
    <plain_text_file>{item_id}.txt</plain_text_file>
    <item_type>article</item_type>
  </item>
</issue>
  </publication>
</lwm>"#
    )
}
