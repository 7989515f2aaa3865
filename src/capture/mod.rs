//! Screen capture: one still image per attached display.
//!
//! [`ScreenSource`] is the seam to the operating environment. [`take`] turns
//! whatever the source yields into base64 JPEG [`Capture`]s, downsampling on
//! the way if asked to.

#[cfg(feature = "screen-capture")]
pub mod screen;
pub mod transform;

use std::sync::Arc;

use anyhow::{Context, Result};
use image::DynamicImage;

use crate::types::{Capture, Display};

pub use transform::TransformOptions;

/// Source of displays and their pixels. Implementations are blocking.
pub trait ScreenSource: Send + Sync {
    fn displays(&self) -> Result<Vec<Display>>;
    fn capture(&self, display: &Display) -> Result<DynamicImage>;
}

/// Capture every attached display once. Any failure aborts the whole cycle.
pub async fn take(source: Arc<dyn ScreenSource>, options: TransformOptions) -> Result<Vec<Capture>> {
    tokio::task::spawn_blocking(move || take_blocking(source.as_ref(), &options))
        .await
        .context("capture task failed")?
}

fn take_blocking(source: &dyn ScreenSource, options: &TransformOptions) -> Result<Vec<Capture>> {
    let displays = source.displays().context("failed to list displays")?;
    displays
        .into_iter()
        .map(|display| {
            let image = source
                .capture(&display)
                .with_context(|| format!("failed to capture display {}", display.name))?;
            let data = transform::encode(image, options)?;
            Ok(Capture { data, display })
        })
        .collect()
}

/// The platform screen source, when compiled in.
pub fn default_source() -> Result<Arc<dyn ScreenSource>> {
    #[cfg(feature = "screen-capture")]
    {
        Ok(Arc::new(screen::NativeScreens))
    }
    #[cfg(not(feature = "screen-capture"))]
    {
        anyhow::bail!("built without the `screen-capture` feature; no screen source available")
    }
}
