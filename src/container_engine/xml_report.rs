//! Structured-result ingestion from a Robot Framework `output.xml` report.
//!
//! Two independent reads of the same document: [`parse_statistics`] pulls the single
//! `statistics/total/stat` element the result classifier needs (§4.6), while
//! [`render_timeline`] reconstructs a human-readable log from suite/test/keyword nodes — the
//! replacement for reading the container's stdout/stderr (§4.6 *Log source policy*).

use roxmltree::Document;

use crate::errors::PipelineError;

/// The single `statistics/total/stat` element's pass/fail counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    pub pass: u64,
    pub fail: u64,
}

/// Parse `xml`'s `statistics/total/stat` element. Errors if the document doesn't parse as XML or
/// the element is missing — the caller falls back to exit-code classification in either case.
pub fn parse_statistics(xml: &str) -> Result<Statistics, PipelineError> {
    let doc = Document::parse(xml)
        .map_err(|e| PipelineError::Execution(format!("output.xml did not parse: {e}")))?;

    let stat = doc
        .descendants()
        .find(|n| n.has_tag_name("total"))
        .and_then(|total| total.children().find(|n| n.has_tag_name("stat")))
        .ok_or_else(|| PipelineError::Execution("output.xml has no statistics/total/stat element".to_string()))?;

    let pass = stat
        .attribute("pass")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let fail = stat
        .attribute("fail")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    Ok(Statistics { pass, fail })
}

/// Reconstruct a readable execution timeline from `xml`'s suite/test/keyword nodes, in lieu of
/// Docker container logs. Never fails — a document that doesn't parse yields a minimal one-line
/// summary rather than propagating an error, since this is a best-effort presentation helper, not
/// part of result classification.
pub fn render_timeline(xml: &str, exit_code: i64) -> String {
    let mut lines = vec![
        format!("Robot Framework Test Execution (Exit Code: {exit_code})"),
        "=".repeat(50),
    ];

    let doc = match Document::parse(xml) {
        Ok(doc) => doc,
        Err(_) => {
            lines.push("output.xml could not be parsed.".to_string());
            return lines.join("\n");
        }
    };

    if let Some(suite) = doc.descendants().find(|n| n.has_tag_name("suite")) {
        if let Some(name) = suite.attribute("name") {
            lines.push(format!("Suite: {name}"));
        }
    }

    for test in doc.descendants().filter(|n| n.has_tag_name("test")) {
        let test_name = test.attribute("name").unwrap_or("Unknown Test");
        let status_node = test.children().find(|n| n.has_tag_name("status"));
        let status = status_node.and_then(|n| n.attribute("status")).unwrap_or("UNKNOWN");
        lines.push(format!("  Test: {test_name} - {status}"));

        if status.eq_ignore_ascii_case("FAIL") {
            if let Some(message) = status_node.and_then(|n| n.text()) {
                let trimmed = message.trim();
                if !trimmed.is_empty() {
                    lines.push(format!("    Error: {trimmed}"));
                }
            }
            for kw in test.descendants().filter(|n| n.has_tag_name("kw")) {
                let kw_status = kw.children().find(|n| n.has_tag_name("status"));
                if kw_status.and_then(|n| n.attribute("status")) == Some("FAIL") {
                    let kw_name = kw.attribute("name").unwrap_or("Unknown Keyword");
                    lines.push(format!("    Failed Keyword: {kw_name}"));
                    if let Some(message) = kw_status.and_then(|n| n.text()) {
                        let trimmed = message.trim();
                        if !trimmed.is_empty() {
                            lines.push(format!("      Details: {trimmed}"));
                        }
                    }
                }
            }
        }
    }

    if let Ok(stats) = parse_statistics(xml) {
        lines.push(format!("Totals: pass={}, fail={}", stats.pass, stats.fail));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
    <robot>
      <suite name="Search Suite">
        <test name="Search Test">
          <kw name="Click">
            <status status="FAIL">element not found</status>
          </kw>
          <status status="FAIL">Test failed: element not found</status>
        </test>
      </suite>
      <statistics>
        <total>
          <stat pass="0" fail="1">All Tests</stat>
        </total>
      </statistics>
    </robot>
    "#;

    #[test]
    fn parse_statistics_reads_pass_and_fail_counts() {
        let stats = parse_statistics(SAMPLE).unwrap();
        assert_eq!(stats.pass, 0);
        assert_eq!(stats.fail, 1);
    }

    #[test]
    fn parse_statistics_errors_on_malformed_xml() {
        assert!(parse_statistics("not xml at all <<<").is_err());
    }

    #[test]
    fn render_timeline_includes_suite_test_and_failure_detail() {
        let timeline = render_timeline(SAMPLE, 1);
        assert!(timeline.contains("Search Suite"));
        assert!(timeline.contains("Search Test - FAIL"));
        assert!(timeline.contains("Failed Keyword: Click"));
    }

    #[test]
    fn render_timeline_never_panics_on_malformed_xml() {
        let timeline = render_timeline("<<<not xml", 1);
        assert!(timeline.contains("could not be parsed"));
    }
}
