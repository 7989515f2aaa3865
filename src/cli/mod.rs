pub mod reset;
pub mod stats;

use std::future::Future;
use std::io::Write;

use anyhow::Result;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use local_recall::capture;
use local_recall::pipeline::{
    self, DescribeAndStore, QueryOptions, QueryOutcome, RecallContext, RecordOptions, Recorder,
};

/// Run `work` until it finishes or the user interrupts. `None` on interrupt.
async fn until_interrupted<T>(work: impl Future<Output = Result<T>>) -> Result<Option<T>> {
    tokio::select! {
        result = work => result.map(Some),
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted");
            Ok(None)
        }
    }
}

/// Record screens, describing captures concurrently unless `describe` is off.
///
/// The first Ctrl-C stops capturing and lets the describer drain what was
/// already published; a second one stops immediately. A bounded recording
/// drains the same way once its last cycle is published.
pub async fn record(ctx: &RecallContext, options: RecordOptions, reset: bool, describe: bool) -> Result<()> {
    if reset {
        ctx.reset().await;
    }
    // Before the describer starts on any backlog.
    ctx.ensure_models().await?;

    let recorder = Recorder::new(ctx, capture::default_source()?);
    let stop = CancellationToken::new();
    let drain = CancellationToken::new();

    let describer = if describe {
        let ctx = ctx.clone();
        let drain = drain.clone();
        let handler = DescribeAndStore::new(&ctx);
        Some(tokio::spawn(async move { handler.run(&ctx, &drain).await }))
    } else {
        None
    };

    let summary = {
        let recording = recorder.run(&options, &stop);
        tokio::pin!(recording);
        tokio::select! {
            summary = &mut recording => summary?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("stopping capture");
                stop.cancel();
                recording.await?
            }
        }
    };
    println!(
        "Captured {} cycle(s), {} image(s) published, {} failed cycle(s).",
        summary.cycles, summary.published, summary.failed_cycles
    );

    if let Some(handle) = describer {
        drain.cancel();
        tracing::info!("describing remaining captures");
        let abort = handle.abort_handle();
        match until_interrupted(async { Ok::<_, anyhow::Error>(handle.await??) }).await? {
            Some(delivered) => println!("Described {delivered} capture(s)."),
            None => abort.abort(),
        }
    }
    Ok(())
}

/// Describe published captures until interrupted, or until the channel is
/// empty when `drain` is set.
pub async fn describe(ctx: &RecallContext, drain: bool) -> Result<()> {
    let handler = DescribeAndStore::new(ctx);
    let shutdown = CancellationToken::new();
    if drain {
        shutdown.cancel();
    }

    if let Some(delivered) = until_interrupted(handler.run(ctx, &shutdown)).await? {
        println!("Described {delivered} capture(s).");
    }
    Ok(())
}

/// Answer `prompt`, streaming the interpretation to stdout.
pub async fn query(ctx: &RecallContext, prompt: &str, options: &QueryOptions) -> Result<()> {
    match pipeline::query(ctx, prompt, options).await? {
        QueryOutcome::NoResults(message) => println!("{message}"),
        QueryOutcome::Answer { matches, mut stream } => {
            for m in &matches {
                tracing::debug!(id = %m.id, distance = m.distance, "match");
            }
            let mut stdout = std::io::stdout();
            while let Some(fragment) = stream.next().await {
                write!(stdout, "{}", fragment?)?;
                stdout.flush()?;
            }
            writeln!(stdout)?;
        }
    }
    Ok(())
}

/// Pull every configured model that is missing.
pub async fn models_pull(ctx: &RecallContext) -> Result<()> {
    ctx.ensure_models().await?;
    println!("Models ready: {}", ctx.config.models.all().join(", "));
    Ok(())
}
