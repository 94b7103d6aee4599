// Streaming delimited-file reader. Rows are yielded one at a time so a
// resumed run can skip already-consumed rows without holding the file in
// memory. Values are split on the configured separator; a row whose
// field count disagrees with the header is a hard error, because a
// silently misaligned row would poison the registries.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};

pub struct DelimitedReader {
    header: Vec<String>,
    lines: Lines<BufReader<File>>,
    separator: char,
    /// Data rows handed out so far, counting skipped ones.
    rows_seen: u64,
    row_cap: Option<u64>,
}

impl DelimitedReader {
    /// Open `path`, read the header, and position the reader after
    /// `skip_rows` data rows. `row_cap` bounds the total number of data
    /// rows consumed across runs, skipped rows included.
    pub fn open(
        path: &Path,
        separator: char,
        skip_rows: u64,
        row_cap: Option<u64>,
    ) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open source file {}", path.display()))?;
        let mut lines = BufReader::new(file).lines();
        let header_line = lines
            .next()
            .ok_or_else(|| anyhow!("Source file {} is empty", path.display()))??;
        let header: Vec<String> = header_line
            .split(separator)
            .map(|s| s.trim().to_string())
            .collect();
        if header.len() < 2 {
            bail!(
                "Source file {} needs an identity column plus at least one attribute",
                path.display()
            );
        }

        let mut reader = Self {
            header,
            lines,
            separator,
            rows_seen: 0,
            row_cap,
        };
        for _ in 0..skip_rows {
            if reader.next_row()?.is_none() {
                break;
            }
        }
        Ok(reader)
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// The next data row, or None at end-of-file or when the row cap is
    /// reached.
    pub fn next_row(&mut self) -> Result<Option<Vec<String>>> {
        if let Some(cap) = self.row_cap {
            if self.rows_seen >= cap {
                return Ok(None);
            }
        }
        let line = match self.lines.next() {
            Some(line) => line.context("Failed reading source row")?,
            None => return Ok(None),
        };
        let fields: Vec<String> = line
            .split(self.separator)
            .map(|s| s.trim().to_string())
            .collect();
        if fields.len() != self.header.len() {
            bail!(
                "Malformed row {}: expected {} fields, found {}",
                self.rows_seen + 1,
                self.header.len(),
                fields.len()
            );
        }
        self.rows_seen += 1;
        Ok(Some(fields))
    }
}
