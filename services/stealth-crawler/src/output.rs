//! Input and output helpers for the command-line scraper

use crate::error::{CrawlerError, Result};
use crate::report::{CrawlReport, SelectorMap};
use std::path::Path;
use tracing::warn;
use url::Url;

/// Output format for scrape results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

/// Whether `url` is an absolute URL with a host
pub fn is_valid_url(url: &str) -> bool {
    Url::parse(url)
        .map(|u| u.host_str().is_some())
        .unwrap_or(false)
}

/// Read URLs from a text file, one per line
///
/// Blank lines and lines starting with `#` are skipped; invalid URLs are
/// skipped with a warning.
pub fn load_urls(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    let urls = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| {
            let valid = is_valid_url(line);
            if !valid {
                warn!("Skipping invalid URL: {}", line);
            }
            valid
        })
        .map(str::to_string)
        .collect();
    Ok(urls)
}

/// Read a JSON object of `name -> css selector`
pub fn load_selectors(path: &Path) -> Result<SelectorMap> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn to_json(reports: &[CrawlReport]) -> Result<String> {
    Ok(serde_json::to_string_pretty(reports)?)
}

/// Flatten reports into CSV: `url`, `status`, then one column per data key
///
/// Columns are the union of data keys across all reports, in first-seen
/// order; missing values are empty.
pub fn to_csv(reports: &[CrawlReport]) -> Result<String> {
    let mut columns: Vec<&str> = Vec::new();
    for report in reports {
        for key in report.data.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key.as_str());
            }
        }
    }

    let mut writer = csv::Writer::from_writer(vec![]);

    let mut header = vec!["url", "status"];
    header.extend(columns.iter().copied());
    writer.write_record(&header)?;

    for report in reports {
        let status = report.status.to_string();
        let mut record = vec![report.url.as_str(), status.as_str()];
        record.extend(
            columns
                .iter()
                .map(|col| report.data.get(*col).map(String::as_str).unwrap_or("")),
        );
        writer.write_record(&record)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| CrawlerError::IoError(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| CrawlerError::IoError(e.to_string()))
}

/// CSV is only written to a file; JSON may go to stdout
pub fn check_destination(format: OutputFormat, output: Option<&Path>) -> Result<()> {
    if format == OutputFormat::Csv && output.is_none() {
        return Err(CrawlerError::ConfigError(
            "CSV output requires --output file".to_string(),
        ));
    }
    Ok(())
}

/// Render reports in `format`
pub fn render(reports: &[CrawlReport], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => to_json(reports),
        OutputFormat::Csv => to_csv(reports),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn report(url: &str, pairs: &[(&str, &str)]) -> CrawlReport {
        let data: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        CrawlReport::success(url, data, vec![])
    }

    #[test]
    fn url_validation() {
        assert!(is_valid_url("https://example.com/path"));
        assert!(!is_valid_url("example.com"));
        assert!(!is_valid_url("mailto:someone@example.com"));
    }

    #[test]
    fn load_urls_skips_comments_blanks_and_invalid() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "# seed list").unwrap();
        writeln!(file, "https://example.com").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  https://example.org/a  ").unwrap();
        writeln!(file, "not-a-url").unwrap();

        let urls = load_urls(file.path()).unwrap();
        assert_eq!(urls, vec!["https://example.com", "https://example.org/a"]);
    }

    #[test]
    fn load_selectors_reads_json_object() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"price": ".price", "name": "h1"}}"#).unwrap();

        let selectors = load_selectors(file.path()).unwrap();
        assert_eq!(selectors["price"], ".price");
        assert_eq!(selectors.len(), 2);
    }

    #[test]
    fn csv_uses_union_of_columns() {
        let reports = vec![
            report("https://a.example", &[("title", "A")]),
            report("https://b.example", &[("h1", "B, heading"), ("title", "B")]),
            CrawlReport::failed("https://c.example", "Failed to fetch page"),
        ];

        let csv = to_csv(&reports).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "url,status,title,h1");
        assert_eq!(lines[1], "https://a.example,success,A,");
        assert_eq!(lines[2], "https://b.example,success,B,\"B, heading\"");
        assert_eq!(lines[3], "https://c.example,failed,,");
    }

    #[test]
    fn csv_needs_an_output_file() {
        assert!(check_destination(OutputFormat::Csv, None).is_err());
        assert!(check_destination(OutputFormat::Csv, Some(Path::new("out.csv"))).is_ok());
        assert!(check_destination(OutputFormat::Json, None).is_ok());
    }

    #[test]
    fn json_output_is_an_array() {
        let json = to_json(&[report("https://a.example", &[("title", "A")])]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value[0]["data"]["title"], "A");
    }
}
