//! Event sources
//!
//! A source hands out a fresh, lazy, finite sequence of events each time
//! `events()` is called, so every ingestion run reads from the beginning.
//! CSV layout detection happens when the sequence is opened, before the
//! first event is produced.
//!
//! Two CSV layouts are known, told apart by the header's column count:
//! - compact (7): `symbol,type,moment,id,action,price,volume`
//! - extended (10): `symbol,system,type,moment,id,action,price,volume,id_deal,price_deal`
//!
//! `#` starts a comment that runs to the end of the line.

use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;
use types::errors::EventError;
use types::event::{OrderEvent, RawEvent};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Unrecognized source layout: {columns} columns (expected 7 or 10)")]
    UnrecognizedLayout { columns: usize },

    #[error("Declared {declared} layout does not match header with {columns} columns")]
    LayoutMismatch { declared: Layout, columns: usize },

    #[error("Source has no header line")]
    Empty,

    #[error("Line {line}: expected {expected} columns, found {found}")]
    ColumnCount {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("Line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: EventError,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Layout ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Compact,
    Extended,
}

impl Layout {
    pub fn columns(&self) -> usize {
        match self {
            Layout::Compact => 7,
            Layout::Extended => 10,
        }
    }

    pub fn from_columns(columns: usize) -> Option<Self> {
        match columns {
            7 => Some(Layout::Compact),
            10 => Some(Layout::Extended),
            _ => None,
        }
    }

    /// Pick the event fields out of a split row. `fields.len()` must equal
    /// `self.columns()`.
    fn project<'a>(&self, fields: &[&'a str]) -> RawEvent<'a> {
        match self {
            Layout::Compact => RawEvent {
                symbol: fields[0],
                side: fields[1],
                timestamp: fields[2],
                order_id: fields[3],
                action: fields[4],
                price: fields[5],
                volume: fields[6],
            },
            Layout::Extended => RawEvent {
                symbol: fields[0],
                side: fields[2],
                timestamp: fields[3],
                order_id: fields[4],
                action: fields[5],
                price: fields[6],
                volume: fields[7],
            },
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layout::Compact => write!(f, "compact"),
            Layout::Extended => write!(f, "extended"),
        }
    }
}

/// Declared or auto-detected layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutChoice {
    #[default]
    Auto,
    Compact,
    Extended,
}

impl LayoutChoice {
    fn resolve(&self, columns: usize) -> Result<Layout, SourceError> {
        let detected = Layout::from_columns(columns);
        match (self, detected) {
            (LayoutChoice::Auto, Some(layout)) => Ok(layout),
            (LayoutChoice::Auto, None) => Err(SourceError::UnrecognizedLayout { columns }),
            (LayoutChoice::Compact, Some(Layout::Compact)) => Ok(Layout::Compact),
            (LayoutChoice::Extended, Some(Layout::Extended)) => Ok(Layout::Extended),
            (LayoutChoice::Compact, _) => Err(SourceError::LayoutMismatch {
                declared: Layout::Compact,
                columns,
            }),
            (LayoutChoice::Extended, _) => Err(SourceError::LayoutMismatch {
                declared: Layout::Extended,
                columns,
            }),
        }
    }
}

// ── CSV reader ──────────────────────────────────────────────────────

/// Lazy CSV row parser over any buffered reader.
pub struct CsvEvents<R> {
    lines: io::Lines<R>,
    layout: Layout,
    line_no: usize,
    failed: bool,
}

impl<R: BufRead> CsvEvents<R> {
    /// Read up to and including the header and settle the layout.
    pub fn new(reader: R, choice: LayoutChoice) -> Result<Self, SourceError> {
        let mut lines = reader.lines();
        let mut line_no = 0;

        let header = loop {
            let Some(line) = lines.next() else {
                return Err(SourceError::Empty);
            };
            line_no += 1;
            let line = line?;
            let content = strip_comment(&line);
            if !content.is_empty() {
                break content.to_string();
            }
        };

        let columns = header.split(',').count();
        let layout = choice.resolve(columns)?;
        debug!(%layout, header = %header, "Source layout detected");

        Ok(Self {
            lines,
            layout,
            line_no,
            failed: false,
        })
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    fn parse_line(&self, content: &str) -> Result<OrderEvent, SourceError> {
        let fields: Vec<&str> = content.split(',').collect();
        if fields.len() != self.layout.columns() {
            return Err(SourceError::ColumnCount {
                line: self.line_no,
                expected: self.layout.columns(),
                found: fields.len(),
            });
        }
        OrderEvent::from_raw(&self.layout.project(&fields)).map_err(|source| {
            SourceError::Malformed {
                line: self.line_no,
                source,
            }
        })
    }
}

impl<R: BufRead> Iterator for CsvEvents<R> {
    type Item = Result<OrderEvent, SourceError>;

    /// Yields events in file order. Stops after the first error.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let line = self.lines.next()?;
            self.line_no += 1;
            let result = match line {
                Ok(line) => {
                    let content = strip_comment(&line);
                    if content.is_empty() {
                        continue;
                    }
                    self.parse_line(content)
                }
                Err(e) => Err(SourceError::Io(e)),
            };
            self.failed = result.is_err();
            return Some(result);
        }
    }
}

fn strip_comment(line: &str) -> &str {
    let content = match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    };
    content.trim()
}

// ── Sources ─────────────────────────────────────────────────────────

pub type EventIter<'a> = Box<dyn Iterator<Item = Result<OrderEvent, SourceError>> + 'a>;

/// A restartable, finite event feed.
pub trait EventSource {
    /// Open a fresh sequence positioned at the first event. Format errors
    /// are reported here, before any event is yielded.
    fn events(&self) -> Result<EventIter<'_>, SourceError>;

    /// Human-readable origin for logs.
    fn describe(&self) -> String;
}

/// CSV file on disk.
#[derive(Debug, Clone)]
pub struct CsvFileSource {
    path: PathBuf,
    layout: LayoutChoice,
}

impl CsvFileSource {
    pub fn new(path: impl Into<PathBuf>, layout: LayoutChoice) -> Self {
        Self {
            path: path.into(),
            layout,
        }
    }
}

impl EventSource for CsvFileSource {
    fn events(&self) -> Result<EventIter<'_>, SourceError> {
        let file = File::open(&self.path)?;
        Ok(Box::new(CsvEvents::new(BufReader::new(file), self.layout)?))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// CSV held in memory.
#[derive(Debug, Clone)]
pub struct CsvTextSource {
    text: String,
    layout: LayoutChoice,
}

impl CsvTextSource {
    pub fn new(text: impl Into<String>, layout: LayoutChoice) -> Self {
        Self {
            text: text.into(),
            layout,
        }
    }
}

impl EventSource for CsvTextSource {
    fn events(&self) -> Result<EventIter<'_>, SourceError> {
        Ok(Box::new(CsvEvents::new(self.text.as_bytes(), self.layout)?))
    }

    fn describe(&self) -> String {
        format!("<inline csv, {} bytes>", self.text.len())
    }
}

/// Already-parsed events.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    events: Vec<OrderEvent>,
}

impl VecSource {
    pub fn new(events: Vec<OrderEvent>) -> Self {
        Self { events }
    }
}

impl EventSource for VecSource {
    fn events(&self) -> Result<EventIter<'_>, SourceError> {
        Ok(Box::new(
            self.events.iter().cloned().map(Ok::<OrderEvent, SourceError>),
        ))
    }

    fn describe(&self) -> String {
        format!("<{} events>", self.events.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use types::event::Action;
    use types::numeric::Price;
    use types::order::Side;

    const COMPACT: &str = "\
# sample feed
symbol,type,moment,id,action,price,volume
SiH1,B,20210201100207662,100,1,75951,50

RIH1,S,20210201100207662,101,1,137100,4   # first ask
RIH1,S,20210201100207863,101,2,137100,4
";

    const EXTENDED: &str = "\
symbol,system,type,moment,id,action,price,volume,id_deal,price_deal
EuH1,F,B,20210201100207663,103,1,92186.5,30,,
EuH1,F,B,20210201100307663,103,0,92186.5,30,,
";

    fn collect(source: &dyn EventSource) -> Vec<OrderEvent> {
        source
            .events()
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_compact_layout_with_comments() {
        let source = CsvTextSource::new(COMPACT, LayoutChoice::Auto);
        let events = collect(&source);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].symbol.as_str(), "SiH1");
        assert_eq!(events[0].side, Side::Buy);
        assert_eq!(events[1].side, Side::Sell);
        assert_eq!(events[2].action, Action::Trade);
    }

    #[test]
    fn test_extended_layout() {
        let source = CsvTextSource::new(EXTENDED, LayoutChoice::Auto);
        let events = collect(&source);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].order_id.value(), 103);
        assert_eq!(events[0].price, "92186.5".parse::<Price>().unwrap());
        assert_eq!(events[0].volume, 30);
        assert_eq!(events[1].action, Action::Cancel);
    }

    #[test]
    fn test_layout_detection() {
        let events = CsvEvents::new(EXTENDED.as_bytes(), LayoutChoice::Auto).unwrap();
        assert_eq!(events.layout(), Layout::Extended);
        let events = CsvEvents::new(COMPACT.as_bytes(), LayoutChoice::Compact).unwrap();
        assert_eq!(events.layout(), Layout::Compact);
    }

    #[test]
    fn test_unrecognized_layout() {
        let source = CsvTextSource::new("a,b,c\n1,2,3\n", LayoutChoice::Auto);
        let err = source.events().err().unwrap();
        assert!(matches!(err, SourceError::UnrecognizedLayout { columns: 3 }));
    }

    #[test]
    fn test_declared_layout_must_match() {
        let source = CsvTextSource::new(COMPACT, LayoutChoice::Extended);
        assert!(matches!(
            source.events().err().unwrap(),
            SourceError::LayoutMismatch { columns: 7, .. }
        ));
    }

    #[test]
    fn test_empty_source() {
        let source = CsvTextSource::new("# only a comment\n\n", LayoutChoice::Auto);
        assert!(matches!(source.events().err().unwrap(), SourceError::Empty));
    }

    #[test]
    fn test_malformed_row_reports_line_and_stops() {
        let text = "symbol,type,moment,id,action,price,volume\n\
                    SiH1,B,1,100,1,75951,50\n\
                    SiH1,B,2,101,7,75951,50\n\
                    SiH1,B,3,102,1,75951,50\n";
        let source = CsvTextSource::new(text, LayoutChoice::Auto);
        let results: Vec<_> = source.events().unwrap().collect();
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        match &results[1] {
            Err(SourceError::Malformed { line, source }) => {
                assert_eq!(*line, 3);
                assert_eq!(*source, EventError::UnknownAction(7));
            }
            other => panic!("Expected Malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_short_row() {
        let text = "symbol,type,moment,id,action,price,volume\nSiH1,B,1,100,1\n";
        let source = CsvTextSource::new(text, LayoutChoice::Auto);
        let first = source.events().unwrap().next().unwrap();
        assert!(matches!(
            first,
            Err(SourceError::ColumnCount { line: 2, expected: 7, found: 5 })
        ));
    }

    #[test]
    fn test_sources_are_restartable() {
        let source = CsvTextSource::new(COMPACT, LayoutChoice::Auto);
        assert_eq!(collect(&source), collect(&source));

        let vec_source = VecSource::new(collect(&source));
        assert_eq!(collect(&vec_source).len(), 3);
        assert_eq!(collect(&vec_source).len(), 3);
    }

    #[test]
    fn test_file_source() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(COMPACT.as_bytes()).unwrap();
        let source = CsvFileSource::new(file.path(), LayoutChoice::Auto);
        assert_eq!(collect(&source).len(), 3);
        assert!(source.describe().contains(&*file.path().to_string_lossy()));

        let missing = CsvFileSource::new("/nonexistent/feed.csv", LayoutChoice::Auto);
        assert!(matches!(missing.events().err().unwrap(), SourceError::Io(_)));
    }
}
