//! Recording orchestrator: capture every display on a timer and publish.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::RecallContext;
use crate::capture::{self, ScreenSource, TransformOptions};
use crate::channel::Producer;

/// Timestamps have whole-second resolution; faster cycles would collide.
pub const MIN_CAPTURE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct RecordOptions {
    pub every: Duration,
    /// Stop after this many capture cycles; run until shutdown when `None`.
    pub max_screenshot_sets: Option<u64>,
}

#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct RecordSummary {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub published: u64,
}

pub struct Recorder {
    ctx: RecallContext,
    screen: Arc<dyn ScreenSource>,
    producer: Producer,
    transform: TransformOptions,
}

impl Recorder {
    pub fn new(ctx: &RecallContext, screen: Arc<dyn ScreenSource>) -> Self {
        Self {
            ctx: ctx.clone(),
            screen,
            producer: ctx.producer(),
            transform: TransformOptions {
                downsample: ctx.config.capture.downsample_to(),
            },
        }
    }

    /// One capture cycle: every display, one published batch.
    pub async fn cycle(&self) -> Result<usize> {
        let captures = capture::take(Arc::clone(&self.screen), self.transform).await?;
        let displays: Vec<&str> = captures.iter().map(|c| c.display.name.as_str()).collect();
        let timestamp = self
            .producer
            .publish_captures(&self.ctx.config.channel.topic, &captures)
            .await?;
        tracing::info!(%timestamp, ?displays, "captured displays");
        Ok(captures.len())
    }

    /// Ensure models are present, then run capture cycles until the bound is
    /// reached or `shutdown` fires. A failed cycle is logged and the timer
    /// carries on.
    pub async fn run(&self, options: &RecordOptions, shutdown: &CancellationToken) -> Result<RecordSummary> {
        self.ctx.ensure_models().await?;

        let every = if options.every < MIN_CAPTURE_INTERVAL {
            tracing::warn!(
                requested_ms = options.every.as_millis() as u64,
                "capture interval below one second; using one second"
            );
            MIN_CAPTURE_INTERVAL
        } else {
            options.every
        };
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut summary = RecordSummary::default();

        tracing::info!(every_ms = every.as_millis() as u64, max = ?options.max_screenshot_sets, "recording started");

        loop {
            if options
                .max_screenshot_sets
                .is_some_and(|max| summary.cycles >= max)
            {
                break;
            }
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            summary.cycles += 1;
            match self.cycle().await {
                Ok(count) => summary.published += count as u64,
                Err(e) => {
                    summary.failed_cycles += 1;
                    tracing::warn!(cycle = summary.cycles, error = %format!("{e:#}"), "capture cycle failed");
                }
            }
        }

        tracing::info!(cycles = summary.cycles, published = summary.published, "recording stopped");
        Ok(summary)
    }
}
