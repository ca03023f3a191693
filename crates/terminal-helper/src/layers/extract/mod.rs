mod nmap_xml;

use std::path::PathBuf;

use protocol::ScanSummary;

use self::nmap_xml::parse_nmap_xml;

const REPORT_MARKER: &str = "<nmaprun";
const XML_DECLARATION: &str = "<?xml";
const XML_OUTPUT_FLAG: &str = "-oX";

/// Recovers a scan summary from a finished command.
///
/// An nmap XML report printed to stdout wins; otherwise an `-oX <file>`
/// argument is followed if the file exists. Anything that cannot be parsed
/// yields an empty summary.
pub(crate) fn extract_summary(stdout: &str, command: &str) -> ScanSummary {
    if let Some(report) = inline_report(stdout) {
        return parse_or_empty(report, "stdout");
    }

    let Some(path) = report_path(command) else {
        return ScanSummary::default();
    };
    if !path.is_file() {
        tracing::debug!(path = %path.display(), "xml report file not found");
        return ScanSummary::default();
    }
    match std::fs::read_to_string(&path) {
        Ok(xml) => parse_or_empty(&xml, "file"),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "failed to read xml report");
            ScanSummary::default()
        }
    }
}

fn inline_report(stdout: &str) -> Option<&str> {
    let marker = stdout.find(REPORT_MARKER)?;
    let start = stdout[..marker].rfind(XML_DECLARATION).unwrap_or(marker);
    Some(&stdout[start..])
}

fn report_path(command: &str) -> Option<PathBuf> {
    let tokens = shell_words::split(command)
        .unwrap_or_else(|_| command.split_whitespace().map(str::to_string).collect());
    let flag = tokens.iter().position(|token| token == XML_OUTPUT_FLAG)?;
    let path = tokens.get(flag + 1)?;
    if path == "-" {
        return None;
    }
    Some(PathBuf::from(path))
}

fn parse_or_empty(xml: &str, source: &'static str) -> ScanSummary {
    match parse_nmap_xml(xml) {
        Ok(summary) => {
            tracing::debug!(source, hosts = summary.hosts.len(), "parsed xml report");
            summary
        }
        Err(err) => {
            tracing::debug!(source, error = %err, "xml report did not parse");
            ScanSummary::default()
        }
    }
}
