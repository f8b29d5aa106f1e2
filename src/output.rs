use std::io::{self, Write};

use serde::Serialize;

use crate::pipeline::{FileOutcome, RunSummary};
use crate::redcap::RedcapValidation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_redcap(result: &RedcapValidation) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        Self::write_summary(&mut stdout, summary)
    }

    pub fn write_summary<W: Write>(out: &mut W, summary: &RunSummary) -> io::Result<()> {
        writeln!(out, "Study directory: {}", summary.study_dir)?;
        writeln!(
            out,
            "Converted {} of {} file(s)",
            summary.files_converted, summary.files_found
        )?;
        for report in &summary.files {
            let format = report
                .format
                .map(|format| format!(" [{format}]"))
                .unwrap_or_default();
            writeln!(out, "  {}: {}{format}", report.file, report.outcome.label())?;
            if let Some(manifest) = &report.manifest
                && report.outcome == FileOutcome::Placed
            {
                writeln!(out, "    manifest: {manifest}")?;
            }
            if let Some(message) = &report.message {
                writeln!(out, "    {message}")?;
            }
        }
        Ok(())
    }

    pub fn print_redcap(result: &RedcapValidation) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        match result {
            RedcapValidation::Compliant { status, imported } => {
                writeln!(stdout, "DD is REDCap compliant (status: {status})")?;
                writeln!(stdout, "Number of variables imported: {imported}")?;
            }
            RedcapValidation::Rejected { errors, .. } => {
                writeln!(stdout, "Errors:")?;
                for error in errors {
                    writeln!(stdout, "- {error}")?;
                }
            }
        }
        Ok(())
    }
}
