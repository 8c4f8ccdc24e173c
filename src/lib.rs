pub mod collector;
pub mod config;
pub mod emitter;
pub mod sink;
pub mod worker;

/// Common types used across modules
pub mod types {
    use std::fmt;

    /// A (column, value) pair exactly as the tool printed it
    pub type Pair = (String, String);

    /// One fully-assembled unit of sampled data.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Row {
        /// One sub-row per device or CPU. The first pair of every sub-row
        /// carries the partition key (device name, CPU id).
        Batch(Vec<Vec<Pair>>),
        /// A single sample line (vmstat)
        Flat(Vec<Pair>),
    }

    impl Row {
        /// Number of sub-rows for a batch, 1 for a flat row
        pub fn len(&self) -> usize {
            match self {
                Row::Batch(rows) => rows.len(),
                Row::Flat(_) => 1,
            }
        }

        pub fn is_empty(&self) -> bool {
            match self {
                Row::Batch(rows) => rows.is_empty(),
                Row::Flat(pairs) => pairs.is_empty(),
            }
        }
    }

    /// The diagnostic tools a worker can drive
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Tool {
        IoStat,
        MpStat,
        VmStat,
    }

    impl Tool {
        pub const ALL: [Tool; 3] = [Tool::IoStat, Tool::MpStat, Tool::VmStat];

        /// Metric namespace and executable name
        pub fn name(&self) -> &'static str {
            match self {
                Tool::IoStat => "iostat",
                Tool::MpStat => "mpstat",
                Tool::VmStat => "vmstat",
            }
        }

        /// Arguments passed to the executable for a sampling interval in seconds
        pub fn args(&self, interval_secs: u64) -> Vec<String> {
            let interval = interval_secs.to_string();
            match self {
                Tool::IoStat => vec!["-xk".into(), interval],
                Tool::MpStat => vec!["-P".into(), "ALL".into(), interval],
                Tool::VmStat => vec![interval],
            }
        }
    }

    impl fmt::Display for Tool {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.name())
        }
    }

    /// Numeric payload of a gauge observation
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum GaugeValue {
        Float(f64),
        Integer(i64),
    }

    impl GaugeValue {
        pub fn is_negative(&self) -> bool {
            match self {
                GaugeValue::Float(v) => *v < 0.0,
                GaugeValue::Integer(v) => *v < 0,
            }
        }
    }

    impl fmt::Display for GaugeValue {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                GaugeValue::Float(v) => write!(f, "{}", v),
                GaugeValue::Integer(v) => write!(f, "{}", v),
            }
        }
    }

    /// A fully-qualified gauge ready for dispatch
    #[derive(Debug, Clone, PartialEq)]
    pub struct Gauge {
        pub name: String,
        pub value: GaugeValue,
    }
}
