//! CLI `reset` command - drop the screenshot collection after confirmation.

use anyhow::{bail, Result};
use std::io::Write;

use local_recall::pipeline::RecallContext;

/// Delete every stored description. Confirmation is skipped with `--yes` or
/// in debug mode. A missing collection is not an error.
pub async fn reset(ctx: &RecallContext, yes: bool) -> Result<()> {
    if !yes && !ctx.config.general.debug {
        println!(
            "WARNING: This will permanently delete every stored description in '{}'.",
            ctx.config.collection.name
        );
        println!("Database: {}", ctx.config.resolved_db_path().display());
        print!("\nType YES to confirm: ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if input.trim() != "YES" {
            bail!("reset cancelled");
        }
    }

    ctx.reset().await;
    println!("Collection reset complete.");
    Ok(())
}
