use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::{LineSource, PipeLines, SectionParser};
use crate::config::CollectorConfig;
use crate::emitter::MetricEmitter;
use crate::sink::MetricSink;
use crate::types::Tool;

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    /// Cancellation observed; no further rows are requested
    Stopping,
    Stopped,
}

/// Why a worker finished without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Cancelled,
    /// The tool closed its output
    StreamClosed,
}

/// Runs one diagnostic tool and forwards every parsed row to the sink.
pub struct Worker {
    tool: Tool,
    program: String,
    args: Vec<String>,
    parser: SectionParser,
    emitter: MetricEmitter,
    sink: Arc<dyn MetricSink>,
    drain_timeout: Duration,
    state: WorkerState,
    rows: u64,
}

impl Worker {
    pub fn new(tool: Tool, config: &CollectorConfig, sink: Arc<dyn MetricSink>) -> Self {
        Self {
            tool,
            program: tool.name().to_string(),
            args: tool.args(config.interval_secs),
            parser: SectionParser::new(tool, config.malformed_lines),
            emitter: MetricEmitter::new(tool, config.send_integers),
            sink,
            drain_timeout: Duration::from_secs(config.drain_timeout_secs),
            state: WorkerState::Running,
            rows: 0,
        }
    }

    /// Run a different executable whose output follows this tool's format
    pub fn with_command(mut self, program: impl Into<String>, args: Vec<String>) -> Self {
        self.program = program.into();
        self.args = args;
        self
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Rows dispatched so far
    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Spawn the tool and pump rows until cancelled or the tool exits.
    ///
    /// A spawn failure or an unrecoverable parse fault is returned as an
    /// error; the child is always reaped before returning.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<WorkerExit> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start `{}`", self.command_line()))?;

        let stdout = child
            .stdout
            .take()
            .context("Child stdout was not captured")?;
        let mut lines = PipeLines::new(BufReader::new(stdout));

        info!(tool = %self.tool, pid = ?child.id(), command = %self.command_line(), "Worker started");

        let outcome = self.drive(&mut lines, &cancel).await;
        self.shutdown(&mut child, lines).await;
        self.state = WorkerState::Stopped;

        match &outcome {
            Ok(exit) => info!(tool = %self.tool, rows = self.rows, exit = ?exit, "Worker stopped"),
            Err(e) => warn!(tool = %self.tool, rows = self.rows, error = %e, "Worker stopped on error"),
        }
        outcome
    }

    /// Request rows from the parser and dispatch them until the token is
    /// cancelled or the source is exhausted. Cancellation is only checked
    /// between rows.
    pub async fn drive<S>(&mut self, source: &mut S, cancel: &CancellationToken) -> Result<WorkerExit>
    where
        S: LineSource + ?Sized,
    {
        loop {
            if cancel.is_cancelled() {
                self.state = WorkerState::Stopping;
                debug!(tool = %self.tool, "Cancellation observed");
                return Ok(WorkerExit::Cancelled);
            }

            let row = self
                .parser
                .parse_one(source)
                .await
                .with_context(|| format!("Failed to parse {} output", self.tool))?;

            let Some(row) = row else {
                self.state = WorkerState::Stopped;
                info!(tool = %self.tool, "Tool closed its output");
                return Ok(WorkerExit::StreamClosed);
            };

            let stats = self.emitter.emit(&row, self.sink.as_ref()).await;
            self.rows += 1;
            debug!(tool = %self.tool, sent = stats.sent, failed = stats.failed, "Row dispatched");
        }
    }

    /// Terminate, drain, close, then reap. Draining keeps the tool from
    /// blocking on a full pipe; the timeout covers output held open by
    /// processes outside our control.
    async fn shutdown(&self, child: &mut Child, mut lines: PipeLines<BufReader<ChildStdout>>) {
        if let Err(e) = terminate(child) {
            debug!(tool = %self.tool, error = %e, "Failed to send SIGTERM");
            self.kill(child);
        }

        match tokio::time::timeout(self.drain_timeout, lines.drain()).await {
            Ok(Ok(bytes)) => debug!(tool = %self.tool, bytes, "Drained remaining output"),
            Ok(Err(e)) => warn!(tool = %self.tool, error = %e, "Failed to drain output"),
            Err(_) => warn!(tool = %self.tool, timeout = ?self.drain_timeout, "Timed out draining output"),
        }
        drop(lines);

        if let Ok(None) = child.try_wait() {
            debug!(tool = %self.tool, "Tool still running after SIGTERM, killing");
            self.kill(child);
        }

        match child.wait().await {
            Ok(status) => debug!(tool = %self.tool, status = %status, "Tool exited"),
            Err(e) => warn!(tool = %self.tool, error = %e, "Failed to wait for tool"),
        }
    }

    fn kill(&self, child: &mut Child) {
        if let Err(e) = child.start_kill() {
            debug!(tool = %self.tool, error = %e, "Tool already exited");
        }
    }
}

/// Ask the tool to exit with SIGTERM
#[cfg(unix)]
fn terminate(child: &Child) -> io::Result<()> {
    let Some(pid) = child.id() else {
        // Already reaped
        return Ok(());
    };
    // SAFETY: `pid` is our own child and has not been reaped yet
    if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn terminate(_child: &Child) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "no SIGTERM on this platform"))
}

/// Build one worker per enabled tool
pub fn create_workers(config: &CollectorConfig, sink: Arc<dyn MetricSink>) -> Vec<Worker> {
    let workers: Vec<Worker> = config
        .enabled_tools()
        .into_iter()
        .map(|tool| Worker::new(tool, config, sink.clone()))
        .collect();

    tracing::info!(count = workers.len(), "Initialized workers");
    workers
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::io;

    use crate::collector::tests::lines;
    use crate::collector::MalformedPolicy;
    use crate::sink::tests::RecordingSink;
    use crate::types::GaugeValue;

    fn config() -> CollectorConfig {
        CollectorConfig::default()
    }

    /// Cancels a token when a given gauge arrives
    struct CancellingSink {
        inner: RecordingSink,
        trigger: String,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl MetricSink for CancellingSink {
        fn name(&self) -> &str { "cancelling" }

        async fn gauge(&self, name: &str, value: GaugeValue) -> Result<()> {
            self.inner.gauge(name, value).await?;
            if name == self.trigger {
                self.cancel.cancel();
            }
            Ok(())
        }
    }

    /// Counts how many lines were requested
    struct CountingSource<S> {
        inner: S,
        requests: usize,
    }

    #[async_trait]
    impl<S: LineSource> LineSource for CountingSource<S> {
        async fn next_line(&mut self) -> io::Result<Option<String>> {
            self.requests += 1;
            self.inner.next_line().await
        }
    }

    #[test]
    fn test_command_lines() {
        let sink: Arc<dyn MetricSink> = Arc::new(RecordingSink::default());
        let cfg = CollectorConfig { interval_secs: 5, ..config() };
        let cmds: Vec<String> = create_workers(&cfg, sink)
            .iter()
            .map(|w| w.command_line())
            .collect();
        assert_eq!(cmds, vec!["iostat -xk 5", "mpstat -P ALL 5", "vmstat 5"]);
    }

    #[test]
    fn test_disabled_tools_get_no_worker() {
        let sink: Arc<dyn MetricSink> = Arc::new(RecordingSink::default());
        let mut cfg = config();
        cfg.iostat.enabled = false;
        let tools: Vec<Tool> = create_workers(&cfg, sink).iter().map(|w| w.tool()).collect();
        assert_eq!(tools, vec![Tool::MpStat, Tool::VmStat]);
    }

    #[tokio::test]
    async fn test_drive_until_end_of_stream() {
        let sink = Arc::new(RecordingSink::default());
        let mut worker = Worker::new(Tool::VmStat, &config(), sink.clone());
        let mut src = lines("procs\nr b\n1 0\n2 1\n");

        let exit = worker.drive(&mut src, &CancellationToken::new()).await.unwrap();
        assert_eq!(exit, WorkerExit::StreamClosed);
        assert_eq!(worker.rows(), 2);
        assert_eq!(worker.state(), WorkerState::Stopped);

        let values: Vec<(String, GaugeValue)> =
            sink.gauges().into_iter().map(|g| (g.name, g.value)).collect();
        assert_eq!(
            values,
            vec![
                ("vmstat.r".to_string(), GaugeValue::Float(1.0)),
                ("vmstat.b".to_string(), GaugeValue::Float(0.0)),
                ("vmstat.r".to_string(), GaugeValue::Float(2.0)),
                ("vmstat.b".to_string(), GaugeValue::Float(1.0)),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start_reads_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let mut worker = Worker::new(Tool::VmStat, &config(), sink.clone());
        let mut src = CountingSource { inner: lines("procs\nr b\n1 0\n"), requests: 0 };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let exit = worker.drive(&mut src, &cancel).await.unwrap();
        assert_eq!(exit, WorkerExit::Cancelled);
        assert_eq!(src.requests, 0);
        assert!(sink.gauges().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_finishes_current_row_only() {
        let cancel = CancellationToken::new();
        let sink = Arc::new(CancellingSink {
            inner: RecordingSink::default(),
            trigger: "vmstat.r".into(),
            cancel: cancel.clone(),
        });
        let mut worker = Worker::new(Tool::VmStat, &config(), sink.clone());
        let mut src = CountingSource { inner: lines("procs\nr b\n1 0\n2 0\n3 0\n"), requests: 0 };

        let exit = worker.drive(&mut src, &cancel).await.unwrap();
        assert_eq!(exit, WorkerExit::Cancelled);
        assert_eq!(worker.state(), WorkerState::Stopping);
        assert_eq!(worker.rows(), 1);
        // The row in flight is still fully dispatched
        let names: Vec<String> = sink.inner.gauges().into_iter().map(|g| g.name).collect();
        assert_eq!(names, vec!["vmstat.r", "vmstat.b"]);
        // banner + header + one data line, nothing after cancellation
        assert_eq!(src.requests, 3);
    }

    #[tokio::test]
    async fn test_parse_fault_ends_worker() {
        let sink = Arc::new(RecordingSink::default());
        let cfg = CollectorConfig { malformed_lines: MalformedPolicy::Fail, ..config() };
        let mut worker = Worker::new(Tool::VmStat, &cfg, sink);
        let mut src = lines("procs\nr b\n1 0 0\n");

        let err = worker.drive(&mut src, &CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("vmstat"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_an_error() {
        let sink: Arc<dyn MetricSink> = Arc::new(RecordingSink::default());
        let worker = Worker::new(Tool::VmStat, &config(), sink)
            .with_command("statsd-ostools-no-such-binary", vec![]);
        let err = worker.run(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("Failed to start"));
    }
}
