//! Human-readable result table, one section per target.
//!
//! A target is scanned start to finish on one thread, so the section opened
//! by `header` is buffered per thread and written out whole at `footer`.
//! Sections from parallel workers never interleave.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

use crate::carve::CarvedFile;
use crate::metadata::{MatchSink, MetadataError, RunSummary, poisoned};
use crate::pipeline::scan::ScanStats;
use crate::scanner::Match;
use crate::stream::TargetInfo;

const RULE_WIDTH: usize = 80;

pub struct TerminalSink {
    out: Mutex<Box<dyn Write + Send>>,
    sections: Mutex<HashMap<ThreadId, String>>,
    show_invalid: bool,
}

impl TerminalSink {
    pub fn new(out: Box<dyn Write + Send>, show_invalid: bool) -> Self {
        Self {
            out: Mutex::new(out),
            sections: Mutex::new(HashMap::new()),
            show_invalid,
        }
    }

    pub fn stdout(show_invalid: bool) -> Self {
        Self::new(Box::new(std::io::stdout()), show_invalid)
    }

    fn emit(&self, text: &str) -> Result<(), MetadataError> {
        let mut out = self.out.lock().map_err(|_| poisoned())?;
        out.write_all(text.as_bytes())?;
        Ok(())
    }

    /// Append to this thread's open section, or write straight through when
    /// no section is open.
    fn append(&self, line: &str) -> Result<(), MetadataError> {
        {
            let mut sections = self.sections.lock().map_err(|_| poisoned())?;
            if let Some(section) = sections.get_mut(&thread::current().id()) {
                section.push_str(line);
                return Ok(());
            }
        }
        self.emit(line)
    }

    fn take_section(&self) -> Result<Option<String>, MetadataError> {
        let mut sections = self.sections.lock().map_err(|_| poisoned())?;
        Ok(sections.remove(&thread::current().id()))
    }
}

fn section_header(target: &TargetInfo) -> String {
    let mut text = format!(
        "\nScan Time:     {}\nTarget File:   {}\nTarget Size:   {} bytes\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        target.path.display(),
        target.len
    );
    if target.depth > 0 {
        text.push_str(&format!("Depth:         {}\n", target.depth));
    }
    text.push_str(&format!(
        "\n{:<14}{:<18}DESCRIPTION\n{}\n",
        "DECIMAL",
        "HEXADECIMAL",
        "-".repeat(RULE_WIDTH)
    ));
    text
}

impl MatchSink for TerminalSink {
    fn header(&self, target: &TargetInfo) -> Result<(), MetadataError> {
        // A section left open by a target that failed mid-scan.
        let stale = {
            let mut sections = self.sections.lock().map_err(|_| poisoned())?;
            sections.insert(thread::current().id(), section_header(target))
        };
        if let Some(stale) = stale {
            self.emit(&stale)?;
        }
        Ok(())
    }

    fn record_match(&self, m: &Match) -> Result<(), MetadataError> {
        if !m.valid && !self.show_invalid {
            return Ok(());
        }
        let hex = if m.offset < 0 {
            format!("-0x{:X}", m.offset.unsigned_abs())
        } else {
            format!("0x{:X}", m.offset)
        };
        let marker = if m.valid { "" } else { " (invalid)" };
        self.append(&format!(
            "{:<14}{:<18}{}{}\n",
            m.offset, hex, m.description, marker
        ))
    }

    fn record_carved(&self, _file: &CarvedFile) -> Result<(), MetadataError> {
        Ok(())
    }

    fn footer(&self, _target: &TargetInfo, _stats: &ScanStats) -> Result<(), MetadataError> {
        let mut section = self.take_section()?.unwrap_or_default();
        section.push('\n');
        self.emit(&section)
    }

    fn record_run_summary(&self, _summary: &RunSummary) -> Result<(), MetadataError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), MetadataError> {
        let leftover: Vec<String> = {
            let mut sections = self.sections.lock().map_err(|_| poisoned())?;
            sections.drain().map(|(_, text)| text).collect()
        };
        let mut out = self.out.lock().map_err(|_| poisoned())?;
        for text in leftover {
            out.write_all(text.as_bytes())?;
        }
        out.flush()?;
        Ok(())
    }
}
