use std::net::SocketAddr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::config::StatsdConfig;
use crate::types::GaugeValue;
use super::MetricSink;

/// statsd client speaking the plain-text UDP protocol, one datagram per gauge
pub struct StatsdClient {
    socket: UdpSocket,
    target: SocketAddr,
    prefix: String,
}

impl StatsdClient {
    pub async fn connect(config: &StatsdConfig) -> Result<Self> {
        let target = tokio::net::lookup_host((config.host.as_str(), config.port))
            .await
            .with_context(|| format!("Failed to resolve statsd host {}:{}", config.host, config.port))?
            .next()
            .with_context(|| format!("No address found for statsd host {}", config.host))?;

        let bind_addr = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind_addr)
            .await
            .context("Failed to bind statsd socket")?;

        tracing::info!(target_addr = %target, prefix = %config.prefix, "statsd client ready");

        Ok(Self {
            socket,
            target,
            prefix: config.prefix.clone(),
        })
    }

    fn format_gauge(&self, name: &str, value: GaugeValue) -> String {
        if self.prefix.is_empty() {
            format!("{}:{}|g", name, value)
        } else {
            format!("{}.{}:{}|g", self.prefix, name, value)
        }
    }

    async fn send(&self, name: &str, line: &str) -> Result<()> {
        self.socket
            .send_to(line.as_bytes(), self.target)
            .await
            .with_context(|| format!("Failed to send {} to {}", name, self.target))?;
        Ok(())
    }
}

#[async_trait]
impl MetricSink for StatsdClient {
    fn name(&self) -> &str { "statsd" }

    async fn gauge(&self, name: &str, value: GaugeValue) -> Result<()> {
        // A signed gauge is a delta on the wire, so reset to zero first
        if value.is_negative() {
            self.send(name, &self.format_gauge(name, GaugeValue::Integer(0))).await?;
        }
        self.send(name, &self.format_gauge(name, value)).await
    }
}
