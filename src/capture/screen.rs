//! Native display capture via the `screenshots` crate.

use anyhow::{Context, Result};
use image::{DynamicImage, ImageBuffer};
use screenshots::Screen;

use super::ScreenSource;
use crate::types::Display;

/// Every display attached to this machine.
pub struct NativeScreens;

impl NativeScreens {
    fn screen_for(display: &Display) -> Result<Screen> {
        Screen::all()?
            .into_iter()
            .find(|screen| screen.display_info.id == display.id)
            .with_context(|| format!("display {} ({}) is no longer attached", display.name, display.id))
    }
}

impl ScreenSource for NativeScreens {
    fn displays(&self) -> Result<Vec<Display>> {
        let screens = Screen::all()?;
        anyhow::ensure!(!screens.is_empty(), "no displays found");
        Ok(screens
            .iter()
            .enumerate()
            .map(|(index, screen)| Display {
                id: screen.display_info.id,
                name: format!("display-{index}"),
            })
            .collect())
    }

    fn capture(&self, display: &Display) -> Result<DynamicImage> {
        let image = Self::screen_for(display)?.capture()?;
        // Rebuild through raw pixels so the `image` version used by `screenshots` doesn't matter.
        let rgba = ImageBuffer::from_raw(image.width(), image.height(), image.into_raw())
            .context("failed to create image buffer")?;
        Ok(DynamicImage::ImageRgba8(rgba))
    }
}
