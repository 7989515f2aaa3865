//! Description and embedding generators.

use std::io::Write;

use anyhow::{Context, Result};
use futures::StreamExt;

use super::{GenerateRequest, ModelService};

pub const IMAGE_DESCRIPTION_PROMPT: &str = "\
This is a screenshot of a desktop.
Describe what you see, what windows or programs are open, and what is the user doing.

If there is a web browser open, describe the contents of the web page.

Refrain from using the word \"screenshot\" or \"desktop\" in your description.";

pub struct DescribeOptions<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    /// Echo each fragment to stdout as it arrives.
    pub echo: bool,
}

/// Describe one base64 image. Streams the response, accumulating fragments
/// into a single trimmed string.
pub async fn generate_description(
    service: &dyn ModelService,
    image: &str,
    options: &DescribeOptions<'_>,
) -> Result<String> {
    let request = GenerateRequest::new(options.model, options.prompt).with_image(image);
    let mut stream = service
        .generate_stream(request)
        .await
        .context("description request failed")?;

    let mut description = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if options.echo {
            // Echo is best effort; a closed stdout must not fail the description.
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(chunk.as_bytes()).ok();
            stdout.flush().ok();
        }
        description.push_str(&chunk);
    }
    if options.echo {
        println!();
    }

    Ok(description.trim().to_string())
}

/// Embed one string, unchanged.
pub async fn generate_embedding(service: &dyn ModelService, model: &str, text: &str) -> Result<Vec<f32>> {
    service
        .embed(model, text)
        .await
        .context("embedding request failed")
}
