use super::{zip_fields, LineSource, MalformedPolicy, ParseError};
use crate::types::{Row, Tool};

/// Token mpstat prints in the second column of every header line
const HEADER_MARKER: &str = "CPU";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekingHeader,
    SkippingToHeader,
    CollectingRows,
}

/// Parser for `mpstat -P ALL <interval>` output.
///
/// Every line starts with a timestamp, so a header is recognised by its
/// second field rather than by prefix. The timestamp column is dropped from
/// both the keys and the values.
#[derive(Debug)]
pub struct MpStatParser {
    state: State,
    keys: Vec<String>,
    policy: MalformedPolicy,
}

fn is_header(fields: &[&str]) -> bool {
    fields.get(1) == Some(&HEADER_MARKER)
}

impl MpStatParser {
    pub fn new(policy: MalformedPolicy) -> Self {
        Self {
            state: State::SeekingHeader,
            keys: Vec::new(),
            policy,
        }
    }

    fn capture_header(&mut self, fields: &[&str]) {
        self.keys = fields[1..].iter().map(|f| f.to_string()).collect();
    }

    pub async fn parse_one<S>(&mut self, source: &mut S) -> Result<Option<Row>, ParseError>
    where
        S: LineSource + ?Sized,
    {
        let mut batch = Vec::new();

        loop {
            let Some(line) = source.next_line().await? else {
                return Ok((!batch.is_empty()).then_some(Row::Batch(batch)));
            };
            let fields: Vec<&str> = line.split_whitespace().collect();

            match self.state {
                // Unlike iostat, the first mpstat report is already an interval sample
                State::SeekingHeader | State::SkippingToHeader => {
                    if is_header(&fields) {
                        self.capture_header(&fields);
                        self.state = State::CollectingRows;
                    }
                }
                State::CollectingRows => {
                    if fields.is_empty() {
                        self.state = State::SkippingToHeader;
                        return Ok(Some(Row::Batch(batch)));
                    }
                    if is_header(&fields) {
                        self.capture_header(&fields);
                        if !batch.is_empty() {
                            return Ok(Some(Row::Batch(batch)));
                        }
                        continue;
                    }

                    if let Some(pairs) =
                        zip_fields(Tool::MpStat, &self.keys, &fields[1..], &line, self.policy)?
                    {
                        batch.push(pairs);
                    }
                }
            }
        }
    }
}
