use anyhow::Result;

use local_recall::channel;
use local_recall::pipeline::RecallContext;

/// Display collection and channel statistics in the terminal.
pub async fn stats(ctx: &RecallContext) -> Result<()> {
    let config = &ctx.config;
    let documents = ctx.collection().await?.count().await?;
    let lag = channel::lag(&ctx.db, &config.channel.group_id, &config.channel.topic).await?;

    println!("Recall Statistics");
    println!("{}", "=".repeat(40));
    println!("  Collection:          {}", config.collection.name);
    println!("  Documents:           {documents}");
    println!();

    println!("Channel '{}':", config.channel.topic);
    match lag.committed {
        Some(offset) => println!("  Committed offset:    {offset}"),
        None => println!("  Committed offset:    (none)"),
    }
    println!("  Log end:             {}", lag.log_end);
    println!("  Retained messages:   {}", lag.retained);
    println!("  Awaiting description: {}", lag.backlog);
    println!();

    println!("Database:              {}", config.resolved_db_path().display());
    Ok(())
}
