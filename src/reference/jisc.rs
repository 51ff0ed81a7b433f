use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::info;

use super::single_publication_code;
use crate::error::PipelineError;

/// Titles the cross-reference table cannot disambiguate on its own.
const TITLE_EXCEPTIONS: &[(&str, &str)] = &[
    ("IPJL", "Ipswich Journal"),
    ("BHCH", "Bath Chronicle"),
    ("LSIR", "Leeds Intelligencer"),
    ("AGER", "Lancaster Gazetter, And General Advertiser For Lancashire West"),
];

#[derive(Debug, Deserialize)]
struct JiscRow {
    #[serde(rename = "Newspaper Title")]
    title: String,
    #[serde(rename = "NLP")]
    nlp: String,
    #[serde(rename = "Abbr")]
    abbr: String,
    #[serde(rename = "StartD")]
    start_d: String,
    #[serde(rename = "StartM")]
    start_m: String,
    #[serde(rename = "StartY")]
    start_y: String,
    #[serde(rename = "EndD")]
    end_d: String,
    #[serde(rename = "EndM")]
    end_m: String,
    #[serde(rename = "EndY")]
    end_y: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JiscPaper {
    pub title: String,
    pub publication_code: String,
    pub abbr: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// JISC paper-title cross-reference table.
#[derive(Debug, Clone, Default)]
pub struct JiscPapers {
    papers: Vec<JiscPaper>,
}

fn month_number(m: &str) -> Option<u32> {
    let m = m.trim().trim_end_matches('.').trim();
    let n = match m {
        "Jan" => 1,
        "Feb" => 2,
        "Mar" => 3,
        "Apr" => 4,
        "May" => 5,
        "Jun" | "June" => 6,
        "Jul" | "July" => 7,
        "Aug" => 8,
        "Sep" | "Sept" => 9,
        "Oct" => 10,
        "Nov" => 11,
        "Dec" => 12,
        _ => return None,
    };
    Some(n)
}

fn number(s: &str) -> Option<i64> {
    let s = s.trim();
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
}

fn date_from(day: &str, month: &str, year: &str) -> Option<NaiveDate> {
    let year = i32::try_from(number(year)?).ok()?;
    let day = u32::try_from(number(day)?).ok()?;
    NaiveDate::from_ymd_opt(year, month_number(month)?, day)
}

/// "Times, The" reads as "The Times".
fn normalize_title(title: &str) -> String {
    let trimmed = title.trim();
    if trimmed.to_lowercase().ends_with(", the") {
        format!("The {}", &trimmed[..trimmed.len() - 5])
    } else {
        title.to_string()
    }
}

impl JiscPaper {
    fn from_row(row: JiscRow) -> Result<Self> {
        let start_date = date_from(&row.start_d, &row.start_m, &row.start_y)
            .with_context(|| format!("Bad start date for JISC title {:?}", row.title))?;
        let end_date = date_from(&row.end_d, &row.end_m, &row.end_y)
            .with_context(|| format!("Bad end date for JISC title {:?}", row.title))?;
        let code = number(&row.nlp)
            .map(|n| n.to_string())
            .unwrap_or_else(|| row.nlp.trim().to_string());
        Ok(JiscPaper {
            title: normalize_title(&row.title),
            publication_code: format!("{:0>7}", code),
            abbr: row.abbr.trim().to_string(),
            start_date,
            end_date,
        })
    }
}

impl JiscPapers {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::Config(format!(
                "Could not find required JISC papers file. Put {} in {} or correct the settings with a different path.",
                path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
                path.parent().map(|p| p.display().to_string()).unwrap_or_default(),
            ))
            .into());
        }
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let papers = Self::from_reader(file)
            .with_context(|| format!("Failed to read JISC papers from {}", path.display()))?;
        info!("Loaded {} JISC paper records", papers.len());
        Ok(papers)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let mut papers = Vec::new();
        for row in rdr.deserialize::<JiscRow>() {
            papers.push(JiscPaper::from_row(row?)?);
        }
        Ok(JiscPapers { papers })
    }

    pub fn len(&self) -> usize {
        self.papers.len()
    }

    fn papers_where<F: Fn(&JiscPaper) -> bool>(&self, pred: F) -> Vec<&JiscPaper> {
        self.papers.iter().filter(|p| pred(p)).collect()
    }

    /// Best-guess title for a paper that has none in its XML.
    ///
    /// Tried in order: a single publication code in `input_sub_path` with a
    /// single matching title; `abbr` with `issue_date` inside the paper's run;
    /// the one distinct title recorded for `abbr`; the fixed exception list;
    /// `abbr` itself.
    pub fn resolve_title(&self, issue_date: &str, input_sub_path: &str, abbr: &str) -> Result<String> {
        if let Some(code) = single_publication_code(input_sub_path) {
            let by_code = self.papers_where(|p| p.publication_code == code);
            if let [paper] = by_code.as_slice() {
                return Ok(paper.title.clone());
            }
        }

        if abbr.is_empty() {
            return Err(PipelineError::Resolution {
                what: "newspaper title",
                detail: format!("no abbreviation for issue {} ({})", issue_date, input_sub_path),
            }
            .into());
        }

        let by_abbr = self.papers_where(|p| p.abbr == abbr);
        if !by_abbr.is_empty() {
            let date = NaiveDate::parse_from_str(issue_date, "%Y-%m-%d").map_err(|e| {
                PipelineError::structure("issue date", format!("{:?}: {}", issue_date, e))
            })?;
            let in_range: Vec<_> = by_abbr
                .iter()
                .filter(|p| p.start_date <= date && date <= p.end_date)
                .collect();
            if let [paper] = in_range.as_slice() {
                return Ok(paper.title.clone());
            }

            let distinct: BTreeSet<&str> = by_abbr.iter().map(|p| p.title.as_str()).collect();
            if distinct.len() == 1 {
                if let Some(title) = distinct.into_iter().next() {
                    return Ok(title.to_string());
                }
            }
        }

        if let Some((_, title)) = TITLE_EXCEPTIONS.iter().find(|(a, _)| *a == abbr) {
            return Ok(title.to_string());
        }
        Ok(abbr.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
Newspaper Title,NLP,Abbr,StartD,StartM,StartY,EndD,EndM,EndY,Notes
Example Gazette,123,ABCD,1,Jan,1800,31,Dec.,1850,x
\"Chronicle, The\",456,CHRN,1,Jan,1800,31,Dec,1849,
Later Chronicle,457,CHRN,1,Jan,1850,31,Dec,1900,
Ipswich Journal (A),1001,IPJL,1,Jan,1800,31,Dec,1820,
Ipswich Journal (B),1001,IPJL,1,Jan,1821,31,Dec,1840,
Ipswich Journal (C),1002,IPJL,1,Sept,1830,30,June,1860,
";

    fn table() -> JiscPapers {
        JiscPapers::from_reader(CSV.as_bytes()).unwrap()
    }

    #[test]
    fn loads_and_normalizes() {
        let t = table();
        assert_eq!(t.len(), 6);
        let first = &t.papers[0];
        assert_eq!(first.publication_code, "0000123");
        assert_eq!(first.end_date, NaiveDate::from_ymd_opt(1850, 12, 31).unwrap());
        assert_eq!(t.papers[1].title, "The Chronicle");
        assert_eq!(t.papers[5].start_date, NaiveDate::from_ymd_opt(1830, 9, 1).unwrap());
    }

    #[test]
    fn unique_abbreviation() {
        let title = table().resolve_title("1900-01-01", "no-code-here", "ABCD").unwrap();
        assert_eq!(title, "Example Gazette");
    }

    #[test]
    fn code_in_sub_path_wins() {
        let title = table().resolve_title("1845-01-01", "0000456/1845/0101", "ZZZZ").unwrap();
        assert_eq!(title, "The Chronicle");
    }

    #[test]
    fn ambiguous_code_falls_through_to_abbreviation() {
        // 0001001 has two titles, so the date range decides
        let title = table().resolve_title("1825-06-01", "0001001/1825", "IPJL").unwrap();
        assert_eq!(title, "Ipswich Journal (B)");
    }

    #[test]
    fn date_range_picks_title() {
        assert_eq!(
            table().resolve_title("1855-03-03", "x", "CHRN").unwrap(),
            "Later Chronicle"
        );
    }

    #[test]
    fn exception_table() {
        // 1835 falls in two IPJL runs
        assert_eq!(
            table().resolve_title("1835-03-03", "x", "IPJL").unwrap(),
            "Ipswich Journal"
        );
    }

    #[test]
    fn unknown_abbreviation_is_returned() {
        assert_eq!(table().resolve_title("1835-03-03", "x", "QQQQ").unwrap(), "QQQQ");
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = JiscPapers::load(Path::new("/nonexistent/JISC papers.csv")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Config(_))
        ));
    }
}
