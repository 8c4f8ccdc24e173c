use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::sink::MetricSink;
use crate::types::{Gauge, GaugeValue, Pair, Row, Tool};

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static SLASHES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"/+").expect("valid regex"));
static DISALLOWED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9_.\-]").expect("valid regex"));

/// Turn a raw column label into a metric-name fragment.
///
/// `%` becomes `p`, whitespace runs become `_`, slash runs become `-`, and
/// anything outside `[A-Za-z0-9_.-]` is dropped: `%util` -> `putil`,
/// `rkB/s` -> `rkB-s`.
pub fn sanitize_key(key: &str) -> String {
    let key = key.replace('%', "p");
    let key = WHITESPACE.replace_all(&key, "_");
    let key = SLASHES.replace_all(&key, "-");
    DISALLOWED.replace_all(&key, "").into_owned()
}

/// Outcome of dispatching one row
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EmitStats {
    pub sent: usize,
    pub failed: usize,
}

/// Converts rows from one tool into gauges and hands them to a sink.
#[derive(Debug, Clone)]
pub struct MetricEmitter {
    tool: Tool,
    send_integers: bool,
}

impl MetricEmitter {
    pub fn new(tool: Tool, send_integers: bool) -> Self {
        Self { tool, send_integers }
    }

    fn convert(&self, name: &str, raw: &str) -> Option<GaugeValue> {
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => Some(if self.send_integers {
                GaugeValue::Integer(v.trunc() as i64)
            } else {
                GaugeValue::Float(v)
            }),
            _ => {
                // vmstat re-prints its column header mid-stream
                debug!(metric = %name, value = %raw, "Skipping non-numeric value");
                None
            }
        }
    }

    fn push_pairs(&self, prefix: &str, pairs: &[Pair], out: &mut Vec<Gauge>) {
        for (key, raw) in pairs {
            let name = format!("{}.{}", prefix, sanitize_key(key));
            if let Some(value) = self.convert(&name, raw) {
                out.push(Gauge { name, value });
            }
        }
    }

    /// Metric names and values for a row, in row order
    pub fn gauges(&self, row: &Row) -> Vec<Gauge> {
        let mut out = Vec::new();
        match row {
            Row::Batch(rows) => {
                for sub in rows {
                    let Some(((_, partition), data)) = sub.split_first() else {
                        continue;
                    };
                    let prefix = format!("{}.{}", self.tool, partition);
                    self.push_pairs(&prefix, data, &mut out);
                }
            }
            Row::Flat(pairs) => self.push_pairs(self.tool.name(), pairs, &mut out),
        }
        out
    }

    /// Send every gauge of a row. A failed send is logged and does not stop the rest.
    pub async fn emit(&self, row: &Row, sink: &dyn MetricSink) -> EmitStats {
        let mut stats = EmitStats::default();
        for gauge in self.gauges(row) {
            debug!(metric = %gauge.name, value = %gauge.value, "gauge");
            match sink.gauge(&gauge.name, gauge.value).await {
                Ok(()) => stats.sent += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(
                        sink = sink.name(),
                        metric = %gauge.name,
                        error = %e,
                        "Failed to send gauge"
                    );
                }
            }
        }
        stats
    }
}
