use super::{zip_fields, LineSource, MalformedPolicy, ParseError};
use crate::types::{Row, Tool};

const HEADER_PREFIX: &str = "Device:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Nothing useful seen yet
    SeekingHeader,
    /// Waiting for the next `Device:` header. iostat's first report holds
    /// since-boot averages, so the section after the first header is skipped.
    SkippingToHeader,
    CollectingRows,
}

/// Parser for `iostat -xk <interval>` output.
///
/// Emits one [`Row::Batch`] per report with one sub-row per device, keyed by
/// the columns of the `Device:` header (the first column renamed `device`).
#[derive(Debug)]
pub struct IoStatParser {
    state: State,
    keys: Vec<String>,
    policy: MalformedPolicy,
}

impl IoStatParser {
    pub fn new(policy: MalformedPolicy) -> Self {
        Self {
            state: State::SeekingHeader,
            keys: Vec::new(),
            policy,
        }
    }

    fn capture_header(&mut self, line: &str) {
        self.keys = line.split_whitespace().map(String::from).collect();
        if let Some(first) = self.keys.first_mut() {
            *first = "device".to_string();
        }
    }

    pub async fn parse_one<S>(&mut self, source: &mut S) -> Result<Option<Row>, ParseError>
    where
        S: LineSource + ?Sized,
    {
        let mut batch = Vec::new();

        loop {
            let Some(line) = source.next_line().await? else {
                // Flush a report cut short by the tool exiting
                return Ok((!batch.is_empty()).then_some(Row::Batch(batch)));
            };

            match self.state {
                State::SeekingHeader => {
                    if line.starts_with(HEADER_PREFIX) {
                        self.capture_header(&line);
                        self.state = State::SkippingToHeader;
                    }
                }
                State::SkippingToHeader => {
                    if line.starts_with(HEADER_PREFIX) {
                        self.capture_header(&line);
                        self.state = State::CollectingRows;
                    }
                }
                State::CollectingRows => {
                    if line.trim().is_empty() {
                        self.state = State::SkippingToHeader;
                        return Ok(Some(Row::Batch(batch)));
                    }
                    if line.starts_with(HEADER_PREFIX) {
                        // Next report began without a blank separator
                        self.capture_header(&line);
                        if !batch.is_empty() {
                            return Ok(Some(Row::Batch(batch)));
                        }
                        continue;
                    }

                    let fields: Vec<&str> = line.split_whitespace().collect();
                    if let Some(pairs) = zip_fields(Tool::IoStat, &self.keys, &fields, &line, self.policy)? {
                        batch.push(pairs);
                    }
                }
            }
        }
    }
}
