pub mod iostat;
pub mod mpstat;
pub mod vmstat;

use std::io;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

use crate::types::{Pair, Row, Tool};

pub use iostat::IoStatParser;
pub use mpstat::MpStatParser;
pub use vmstat::VmStatParser;

/// Pull-based source of text lines from a diagnostic tool.
///
/// `Ok(None)` means the tool closed its output. Interrupted reads are not
/// surfaced to the caller.
#[async_trait]
pub trait LineSource: Send {
    async fn next_line(&mut self) -> io::Result<Option<String>>;
}

/// Line source over a buffered pipe (normally a child's stdout).
///
/// Bytes read before an interrupted read are kept and completed by the
/// retry. Output is decoded lossily and line terminators are stripped.
pub struct PipeLines<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: AsyncBufRead + Unpin + Send> PipeLines<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, buf: Vec::with_capacity(256) }
    }

    /// Read and discard everything left in the pipe, returning the byte count
    pub async fn drain(&mut self) -> io::Result<u64> {
        let pending = self.buf.len() as u64;
        self.buf.clear();
        let copied = tokio::io::copy_buf(&mut self.reader, &mut tokio::io::sink()).await?;
        Ok(pending + copied)
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> LineSource for PipeLines<R> {
    async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            match self.reader.read_until(b'\n', &mut self.buf).await {
                Ok(0) if self.buf.is_empty() => return Ok(None),
                Ok(_) => {
                    let line = decode_line(&self.buf);
                    self.buf.clear();
                    return Ok(Some(line));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let mut line = String::from_utf8_lossy(raw).into_owned();
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    line
}

/// What a parser does with a data line whose field count differs from the
/// section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Log the line and keep parsing
    #[default]
    Skip,
    /// Stop the worker with [`ParseError::Malformed`]
    Fail,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("{tool}: malformed line (expected {expected} fields, got {actual}): {line:?}")]
    Malformed {
        tool: Tool,
        expected: usize,
        actual: usize,
        line: String,
    },
    #[error("failed to read tool output: {0}")]
    Io(#[from] io::Error),
}

/// Pair a section header with one data line's fields.
///
/// Returns `Ok(None)` when the line was dropped under [`MalformedPolicy::Skip`].
pub(crate) fn zip_fields(
    tool: Tool,
    keys: &[String],
    fields: &[&str],
    line: &str,
    policy: MalformedPolicy,
) -> Result<Option<Vec<Pair>>, ParseError> {
    if fields.len() != keys.len() {
        return match policy {
            MalformedPolicy::Skip => {
                warn!(
                    tool = %tool,
                    expected = keys.len(),
                    actual = fields.len(),
                    line = %line,
                    "Skipping malformed line"
                );
                Ok(None)
            }
            MalformedPolicy::Fail => Err(ParseError::Malformed {
                tool,
                expected: keys.len(),
                actual: fields.len(),
                line: line.to_string(),
            }),
        };
    }

    Ok(Some(
        keys.iter()
            .cloned()
            .zip(fields.iter().map(|f| f.to_string()))
            .collect(),
    ))
}

/// Incremental parser for one tool's output, one variant per grammar.
#[derive(Debug)]
pub enum SectionParser {
    IoStat(IoStatParser),
    MpStat(MpStatParser),
    VmStat(VmStatParser),
}

impl SectionParser {
    pub fn new(tool: Tool, policy: MalformedPolicy) -> Self {
        match tool {
            Tool::IoStat => SectionParser::IoStat(IoStatParser::new(policy)),
            Tool::MpStat => SectionParser::MpStat(MpStatParser::new(policy)),
            Tool::VmStat => SectionParser::VmStat(VmStatParser::new(policy)),
        }
    }

    pub fn tool(&self) -> Tool {
        match self {
            SectionParser::IoStat(_) => Tool::IoStat,
            SectionParser::MpStat(_) => Tool::MpStat,
            SectionParser::VmStat(_) => Tool::VmStat,
        }
    }

    /// Read lines until the next complete row. `Ok(None)` once the source is exhausted.
    pub async fn parse_one<S>(&mut self, source: &mut S) -> Result<Option<Row>, ParseError>
    where
        S: LineSource + ?Sized,
    {
        match self {
            SectionParser::IoStat(p) => p.parse_one(source).await,
            SectionParser::MpStat(p) => p.parse_one(source).await,
            SectionParser::VmStat(p) => p.parse_one(source).await,
        }
    }
}
