#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use image::{DynamicImage, Rgb, RgbImage};
use tokio_util::sync::CancellationToken;

use local_recall::capture::ScreenSource;
use local_recall::channel::{OutgoingMessage, Producer};
use local_recall::config::RecallConfig;
use local_recall::db;
use local_recall::model::{GenerateRequest, ModelService, TextStream};
use local_recall::pipeline::{DescribeAndStore, RecallContext};
use local_recall::types::{Capture, ChannelMessage, Display};

pub const RED: [u8; 3] = [220, 20, 20];
pub const BLUE: [u8; 3] = [20, 20, 220];

/// Config tuned for tests: no downsampling, fast polling.
pub fn test_config() -> RecallConfig {
    let mut config = RecallConfig::default();
    config.capture.downsample = false;
    config.channel.poll_interval_ms = 5;
    config
}

/// A context over a fresh in-memory database and the given fake models.
pub fn test_context(models: Arc<FakeModels>) -> RecallContext {
    test_context_with(test_config(), models)
}

pub fn test_context_with(config: RecallConfig, models: Arc<FakeModels>) -> RecallContext {
    let db = db::open_in_memory().unwrap();
    RecallContext::new(config, db, models)
}

/// A token that is already cancelled: consumers drain and return.
pub fn drained() -> CancellationToken {
    let token = CancellationToken::new();
    token.cancel();
    token
}

pub fn solid(color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 24, Rgb(color)))
}

/// A base64 JPEG capture of a solid colour.
pub fn capture(color: [u8; 3], display: Display) -> Capture {
    let data = local_recall::capture::transform::encode(solid(color), &Default::default()).unwrap();
    Capture { data, display }
}

pub fn display(id: u32) -> Display {
    Display {
        id,
        name: format!("display-{id}"),
    }
}

/// Publish one message per capture, all stamped with `timestamp`.
pub async fn publish(ctx: &RecallContext, timestamp: &str, captures: &[Capture]) {
    let messages = captures
        .iter()
        .map(|c| ChannelMessage::encode(c, timestamp).unwrap())
        .collect();
    Producer::new(ctx.db.clone())
        .send(&ctx.config.channel.topic, messages)
        .await
        .unwrap();
}

/// Publish raw messages, bypassing capture encoding.
pub async fn publish_raw(ctx: &RecallContext, messages: Vec<OutgoingMessage>) {
    Producer::new(ctx.db.clone())
        .send(&ctx.config.channel.topic, messages)
        .await
        .unwrap();
}

/// Run the describer until the channel is empty. Returns messages delivered.
pub async fn describe_all(ctx: &RecallContext) -> u64 {
    let handler = DescribeAndStore::new(ctx);
    handler.run(ctx, &drained()).await.unwrap()
}

/// Screens that each show a solid colour.
pub struct FakeScreen {
    pub screens: Vec<(Display, [u8; 3])>,
    pub fail: AtomicBool,
    pub captures: AtomicUsize,
}

impl FakeScreen {
    pub fn new(screens: Vec<(Display, [u8; 3])>) -> Self {
        Self {
            screens,
            fail: AtomicBool::new(false),
            captures: AtomicUsize::new(0),
        }
    }
}

impl ScreenSource for FakeScreen {
    fn displays(&self) -> Result<Vec<Display>> {
        Ok(self.screens.iter().map(|(d, _)| d.clone()).collect())
    }

    fn capture(&self, display: &Display) -> Result<DynamicImage> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("display {} went away", display.name);
        }
        self.captures.fetch_add(1, Ordering::SeqCst);
        let (_, color) = self
            .screens
            .iter()
            .find(|(d, _)| d == display)
            .ok_or_else(|| anyhow::anyhow!("unknown display"))?;
        Ok(solid(*color))
    }
}

/// Deterministic stand-in for a model host.
///
/// Describes images by their dominant colour, embeds text by which colour
/// word it mentions, and answers interpretation prompts with a fixed reply.
#[derive(Default)]
pub struct FakeModels {
    pub available: Mutex<Vec<String>>,
    pub pulled: Mutex<Vec<String>>,
    pub interpretations: Mutex<Vec<String>>,
    pub expansions: AtomicUsize,
    pub descriptions: AtomicUsize,
    /// Fail this many description calls before succeeding.
    pub failing_descriptions: AtomicUsize,
    /// Refuse generation and embedding with models that were never pulled.
    pub require_pulled: bool,
}

impl FakeModels {
    pub fn with_models(models: &[&str]) -> Self {
        Self {
            available: Mutex::new(models.iter().map(|m| m.to_string()).collect()),
            ..Default::default()
        }
    }

    /// A host with nothing pulled yet that rejects unknown models.
    pub fn cold() -> Self {
        Self {
            require_pulled: true,
            ..Default::default()
        }
    }

    pub fn interpretation_count(&self) -> usize {
        self.interpretations.lock().unwrap().len()
    }

    fn check_available(&self, model: &str) -> Result<()> {
        if self.require_pulled && !self.available.lock().unwrap().iter().any(|m| m == model) {
            bail!("model '{model}' not found, try pulling it first");
        }
        Ok(())
    }

    fn describe(image: &str) -> Result<String> {
        let bytes = general_purpose::STANDARD.decode(image)?;
        let pixel = image::load_from_memory(&bytes)?.to_rgb8().get_pixel(16, 12).0;
        Ok(if pixel[0] > pixel[2] {
            "a red editor window".into()
        } else {
            "a blue music player".into()
        })
    }
}

fn chunks(text: &str) -> TextStream {
    let parts: Vec<Result<String>> = text
        .split_inclusive(' ')
        .map(|p| Ok(p.to_string()))
        .collect();
    Box::pin(futures::stream::iter(parts))
}

#[async_trait]
impl ModelService for FakeModels {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        self.check_available(&request.model)?;
        self.expansions.fetch_add(1, Ordering::SeqCst);
        Ok(format!("{} (expanded)", request.prompt))
    }

    async fn generate_stream(&self, request: GenerateRequest) -> Result<TextStream> {
        self.check_available(&request.model)?;
        if let Some(image) = request.images.first() {
            if self
                .failing_descriptions
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                bail!("model host unavailable");
            }
            self.descriptions.fetch_add(1, Ordering::SeqCst);
            return Ok(chunks(&Self::describe(image)?));
        }
        self.interpretations.lock().unwrap().push(request.prompt);
        Ok(chunks("You were looking at something colourful."))
    }

    async fn embed(&self, model: &str, prompt: &str) -> Result<Vec<f32>> {
        self.check_available(model)?;
        Ok(if prompt.contains("red") {
            vec![1.0, 0.0, 0.0, 0.0]
        } else if prompt.contains("blue") {
            vec![0.0, 1.0, 0.0, 0.0]
        } else {
            vec![0.0, 0.0, 1.0, 0.0]
        })
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(self.available.lock().unwrap().clone())
    }

    async fn pull_model(&self, model: &str) -> Result<()> {
        self.pulled.lock().unwrap().push(model.to_string());
        self.available.lock().unwrap().push(model.to_string());
        Ok(())
    }
}
