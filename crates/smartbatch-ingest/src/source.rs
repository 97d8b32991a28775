//! Delimited record source
//!
//! A [`RecordSource`] hands out one [`RecordCursor`] per pass. The cursor owns
//! the open file; dropping it (end of pass or error) releases the handle.
//! Each cursor discards its header lines before yielding anything, then
//! tokenizes every following line into a [`FieldSet`].

use crate::error::{IngestError, Result};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Column names, in file order.
pub const FIELD_NAMES: [&str; 6] = [
    "brand",
    "model",
    "operating_system",
    "release_year",
    "screen_size",
    "price",
];

/// Raw, named values of one source line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSet {
    /// 1-based physical line number in the source
    pub line: u64,
    values: HashMap<&'static str, String>,
}

impl FieldSet {
    pub fn new(line: u64, values: HashMap<&'static str, String>) -> Self {
        Self { line, values }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Produces cursors over the same finite input, always from the start.
pub trait RecordSource {
    type Cursor: RecordCursor;

    /// Where the records come from, for logs and errors
    fn location(&self) -> String;

    /// Acquire the underlying resource and position after the header
    fn open(&self) -> Result<Self::Cursor>;
}

/// One forward-only pass over a source
pub trait RecordCursor {
    /// Next field set, `None` at end of input
    fn next_fields(&mut self) -> Result<Option<FieldSet>>;
}

/// Semicolon (or other single byte) separated text file
#[derive(Debug, Clone)]
pub struct DelimitedFileSource {
    path: PathBuf,
    delimiter: u8,
    header_lines: usize,
}

impl DelimitedFileSource {
    pub fn new(path: impl Into<PathBuf>, delimiter: u8, header_lines: usize) -> Self {
        Self {
            path: path.into(),
            delimiter,
            header_lines,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSource for DelimitedFileSource {
    type Cursor = DelimitedReader<File>;

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn open(&self) -> Result<Self::Cursor> {
        let file = File::open(&self.path).map_err(|e| IngestError::resource(self.location(), e))?;
        debug!(path = %self.path.display(), "Opened source file");

        let mut reader = DelimitedReader::new(file, self.delimiter, self.location());
        reader.skip_header(self.header_lines)?;
        Ok(reader)
    }
}

/// Tokenizing cursor over any byte stream
pub struct DelimitedReader<R: Read> {
    location: String,
    tokenizer: csv::Reader<BufReader<R>>,
    lines_skipped: u64,
    started: bool,
    record: csv::StringRecord,
}

impl<R: Read> DelimitedReader<R> {
    pub fn new(input: R, delimiter: u8, location: impl Into<String>) -> Self {
        let tokenizer = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(BufReader::new(input));

        Self {
            location: location.into(),
            tokenizer,
            lines_skipped: 0,
            started: false,
            record: csv::StringRecord::new(),
        }
    }

    /// Discard the next `count` physical lines, whatever they contain
    ///
    /// Only valid before the first record is read: the tokenizer has not
    /// buffered anything yet, so the lines come straight off the input.
    pub fn skip_header(&mut self, count: usize) -> Result<()> {
        if self.started {
            return Err(IngestError::configuration(
                "header lines can only be skipped before reading records",
            ));
        }

        let input = self.tokenizer.get_mut();
        let mut discarded = Vec::new();
        for _ in 0..count {
            discarded.clear();
            let read = input
                .read_until(b'\n', &mut discarded)
                .map_err(|e| IngestError::resource(self.location.clone(), e))?;
            if read == 0 {
                break;
            }
            self.lines_skipped += 1;
        }

        debug!(lines = self.lines_skipped, "Skipped header lines");
        Ok(())
    }
}

impl<R: Read> RecordCursor for DelimitedReader<R> {
    fn next_fields(&mut self) -> Result<Option<FieldSet>> {
        self.started = true;

        loop {
            match self.tokenizer.read_record(&mut self.record) {
                Ok(false) => return Ok(None),
                Ok(true) => {
                    if self.record.len() == 1 && self.record[0].is_empty() {
                        continue;
                    }
                    let line = self.lines_skipped + self.record.position().map_or(0, |p| p.line());
                    return to_field_set(&self.record, line).map(Some);
                },
                Err(e) => return Err(classify(e, self.lines_skipped, &self.location)),
            }
        }
    }
}

fn to_field_set(record: &csv::StringRecord, line: u64) -> Result<FieldSet> {
    if record.len() != FIELD_NAMES.len() {
        return Err(IngestError::Parse {
            line,
            message: format!(
                "expected {} fields, found {}",
                FIELD_NAMES.len(),
                record.len()
            ),
        });
    }

    let values = FIELD_NAMES
        .iter()
        .zip(record.iter())
        .map(|(name, value)| (*name, value.to_string()))
        .collect();

    Ok(FieldSet::new(line, values))
}

fn classify(err: csv::Error, offset: u64, location: &str) -> IngestError {
    let line = offset + err.position().map_or(0, |p| p.line());
    match err.into_kind() {
        csv::ErrorKind::Io(io) => IngestError::resource(location, io),
        csv::ErrorKind::Utf8 { err, .. } => IngestError::Parse {
            line,
            message: format!("invalid UTF-8: {}", err),
        },
        other => IngestError::Parse {
            line,
            message: format!("{:?}", other),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn reader(text: &str, header_lines: usize) -> DelimitedReader<Cursor<Vec<u8>>> {
        let mut reader = DelimitedReader::new(Cursor::new(text.as_bytes().to_vec()), b';', "inline");
        reader.skip_header(header_lines).unwrap();
        reader
    }

    fn drain<R: Read>(reader: &mut DelimitedReader<R>) -> Vec<FieldSet> {
        let mut out = Vec::new();
        while let Some(fields) = reader.next_fields().unwrap() {
            out.push(fields);
        }
        out
    }

    #[test]
    fn test_header_is_skipped_and_fields_are_named() {
        let mut reader = reader(
            "marque;modele;os;annee;taille;prix\nAcme;X1;OS1;2022;6.1;100.00\n",
            1,
        );
        let records = drain(&mut reader);

        assert_eq!(records.len(), 1);
        let fields = &records[0];
        assert_eq!(fields.line, 2);
        assert_eq!(fields.get("brand"), Some("Acme"));
        assert_eq!(fields.get("operating_system"), Some("OS1"));
        assert_eq!(fields.get("price"), Some("100.00"));
    }

    #[test]
    fn test_header_skip_is_unconditional() {
        // The header has the wrong field count and an unbalanced quote
        let mut reader = reader("\"broken;header\nAcme;X1;OS1;2022;6.1;100\n", 1);
        assert_eq!(drain(&mut reader).len(), 1);
    }

    #[test]
    fn test_no_header_configured() {
        let mut reader = reader("Acme;X1;OS1;2022;6.1;100\nAcme;X2;OS1;2024;6.5;200\n", 0);
        let records = drain(&mut reader);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].line, 1);
        assert_eq!(records[1].line, 2);
    }

    #[test]
    fn test_fields_are_trimmed_and_quotes_honoured() {
        let mut reader = reader("h\n\"Acme; Inc\";X1 ;OS1; 2022 ;6.1; 100 \n", 1);
        let fields = reader.next_fields().unwrap().unwrap();
        assert_eq!(fields.get("brand"), Some("Acme; Inc"));
        assert_eq!(fields.get("model"), Some("X1"));
        assert_eq!(fields.get("release_year"), Some("2022"));
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let mut reader = reader("h\n\nAcme;X1;OS1;2022;6.1;100\n\n", 1);
        let records = drain(&mut reader);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].line, 3);
    }

    #[test]
    fn test_wrong_field_count_reports_line() {
        let mut reader = reader("h\nAcme;X1;OS1;2022;6.1;100\nAcme;X2;2024;6.5\n", 1);
        assert!(reader.next_fields().unwrap().is_some());

        let err = reader.next_fields().unwrap_err();
        match err {
            IngestError::Parse { line, message } => {
                assert_eq!(line, 3);
                assert!(message.contains("expected 6 fields, found 4"));
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_utf8_is_a_parse_error() {
        let mut bytes = b"h\n".to_vec();
        bytes.extend_from_slice(b"Acme;X\xff;OS1;2022;6.1;100\n");
        let mut reader = DelimitedReader::new(Cursor::new(bytes), b';', "inline");
        reader.skip_header(1).unwrap();

        let err = reader.next_fields().unwrap_err();
        assert!(matches!(err, IngestError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_skip_header_after_reading_is_rejected() {
        let mut reader = reader("Acme;X1;OS1;2022;6.1;100\n", 0);
        reader.next_fields().unwrap();
        assert!(reader.skip_header(1).is_err());
    }

    #[test]
    fn test_file_source_reopens_from_start() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "header\nAcme;X1;OS1;2022;6.1;100\n").unwrap();
        let source = DelimitedFileSource::new(file.path(), b';', 1);

        for _ in 0..2 {
            let mut cursor = source.open().unwrap();
            assert_eq!(drain(&mut cursor).len(), 1);
        }
    }

    #[test]
    fn test_missing_file_is_a_resource_error() {
        let source = DelimitedFileSource::new("/definitely/not/here.csv", b';', 1);
        assert!(matches!(source.open(), Err(IngestError::Resource { .. })));
    }
}
