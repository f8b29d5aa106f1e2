//! File-name based format sniffing.

use crate::domain::{DetectionStrategy, InputFormat};

const STATA_SUFFIX: &str = ".dta";
const DATA_DICT_SUFFIX: &str = ".data-dict.csv";
const REDCAP_SUFFIXES: [&str; 2] = [".redcap.csv", "_redcap.csv"];
const CSV_SUFFIX: &str = ".csv";

/// Candidate formats for `file_name`, most specific first, or `None` when the
/// name matches no known convention.
pub fn detect_formats(file_name: &str, strategy: DetectionStrategy) -> Option<Vec<InputFormat>> {
    let name = file_name.to_ascii_lowercase();
    if name.ends_with(STATA_SUFFIX) {
        return Some(vec![InputFormat::Stata]);
    }
    if name.ends_with(DATA_DICT_SUFFIX) {
        return Some(vec![InputFormat::CsvDataDict]);
    }
    let is_redcap = REDCAP_SUFFIXES.iter().any(|suffix| name.ends_with(suffix));
    if is_redcap || name.ends_with(CSV_SUFFIX) {
        return Some(match strategy {
            DetectionStrategy::Fallback => vec![InputFormat::CsvData, InputFormat::RedcapCsv],
            DetectionStrategy::Direct => vec![InputFormat::RedcapCsv],
        });
    }
    None
}
