use super::{zip_fields, LineSource, MalformedPolicy, ParseError};
use crate::types::{Row, Tool};

/// First line of every vmstat header block (`procs -----memory---- ...`)
const BANNER_PREFIX: &str = "procs";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekingBanner,
    ReadingHeader,
    ReadingData,
}

/// Parser for `vmstat <interval>` output.
///
/// Produces one [`Row::Flat`] per data line. Re-printed banners are skipped
/// once sampling has begun; the column header line that follows a re-printed
/// banner is not recognised and comes through as a row of non-numeric values.
#[derive(Debug)]
pub struct VmStatParser {
    state: State,
    keys: Vec<String>,
    policy: MalformedPolicy,
}

impl VmStatParser {
    pub fn new(policy: MalformedPolicy) -> Self {
        Self {
            state: State::SeekingBanner,
            keys: Vec::new(),
            policy,
        }
    }

    pub async fn parse_one<S>(&mut self, source: &mut S) -> Result<Option<Row>, ParseError>
    where
        S: LineSource + ?Sized,
    {
        while let Some(line) = source.next_line().await? {
            match self.state {
                State::SeekingBanner => {
                    if line.starts_with(BANNER_PREFIX) {
                        self.state = State::ReadingHeader;
                    }
                }
                State::ReadingHeader => {
                    self.keys = line.split_whitespace().map(String::from).collect();
                    self.state = State::ReadingData;
                }
                State::ReadingData => {
                    if line.starts_with(BANNER_PREFIX) || line.trim().is_empty() {
                        continue;
                    }
                    let fields: Vec<&str> = line.split_whitespace().collect();
                    if let Some(pairs) = zip_fields(Tool::VmStat, &self.keys, &fields, &line, self.policy)? {
                        return Ok(Some(Row::Flat(pairs)));
                    }
                }
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::tests::lines;

    #[tokio::test]
    async fn test_single_row_then_end_of_stream() {
        let mut src = lines("procs -----\nr b swpd\n1 0 0\n");
        let mut parser = VmStatParser::new(MalformedPolicy::Skip);

        let row = parser.parse_one(&mut src).await.unwrap();
        assert_eq!(
            row,
            Some(Row::Flat(vec![
                ("r".into(), "1".into()),
                ("b".into(), "0".into()),
                ("swpd".into(), "0".into()),
            ]))
        );
        assert!(parser.parse_one(&mut src).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_row_per_call() {
        let mut src = lines(
            "procs -----------memory---------- ---swap-- -----io---- -system-- ------cpu-----\n \
             r  b   swpd   free   buff  cache   si   so    bi    bo   in   cs us sy id wa st\n \
             1  0      0 812344  90212 1203344    0    0    12    20  110  230  2  1 97  0  0\n \
             0  0      0 812100  90212 1203400    0    0     0     8   95  201  1  0 99  0  0\n \
             2  0      0 811900  90220 1203410    0    0     0    16  120  260  3  1 96  0  0\n",
        );
        let mut parser = VmStatParser::new(MalformedPolicy::Skip);

        let mut rows = Vec::new();
        while let Some(row) = parser.parse_one(&mut src).await.unwrap() {
            rows.push(row);
        }
        assert_eq!(rows.len(), 3);
        let Row::Flat(last) = &rows[2] else { panic!("expected a flat row") };
        assert_eq!(last.len(), 17);
        assert_eq!(last[0], ("r".to_string(), "2".to_string()));
        assert_eq!(last[14], ("id".to_string(), "96".to_string()));
    }

    #[tokio::test]
    async fn test_repeated_banner_does_not_consume_a_call() {
        let mut src = lines("procs\nr b\n1 0\nprocs ---\n2 0\n");
        let mut parser = VmStatParser::new(MalformedPolicy::Skip);

        let first = parser.parse_one(&mut src).await.unwrap().unwrap();
        let second = parser.parse_one(&mut src).await.unwrap().unwrap();
        assert_eq!(first, Row::Flat(vec![("r".into(), "1".into()), ("b".into(), "0".into())]));
        assert_eq!(second, Row::Flat(vec![("r".into(), "2".into()), ("b".into(), "0".into())]));
        assert!(parser.parse_one(&mut src).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nothing_before_banner() {
        let mut src = lines("r b\n1 0\n");
        let mut parser = VmStatParser::new(MalformedPolicy::Skip);
        assert!(parser.parse_one(&mut src).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_short_line_skipped() {
        let mut src = lines("procs\nr b\n1\n3 1\n");
        let mut parser = VmStatParser::new(MalformedPolicy::Skip);

        let row = parser.parse_one(&mut src).await.unwrap().unwrap();
        assert_eq!(row, Row::Flat(vec![("r".into(), "3".into()), ("b".into(), "1".into())]));
    }

    #[tokio::test]
    async fn test_short_line_fails_under_fail_policy() {
        let mut src = lines("procs\nr b\n1\n3 1\n");
        let mut parser = VmStatParser::new(MalformedPolicy::Fail);

        let err = parser.parse_one(&mut src).await.unwrap_err();
        assert!(matches!(err, ParseError::Malformed { expected: 2, actual: 1, .. }));
    }
}
