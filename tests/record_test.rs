mod helpers;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use helpers::{describe_all, display, drained, test_context, FakeModels, FakeScreen, BLUE, RED};
use anyhow::Result;
use async_trait::async_trait;
use local_recall::channel::{self, EachMessagePayload, MessageHandler};
use local_recall::pipeline::{query, QueryOptions, QueryOutcome, RecordOptions, Recorder};
use local_recall::types::ChannelMessage;
use tokio_util::sync::CancellationToken;

fn two_screens() -> Arc<FakeScreen> {
    Arc::new(FakeScreen::new(vec![(display(1), RED), (display(2), BLUE)]))
}

#[derive(Default)]
struct CollectTimestamps(Mutex<Vec<i64>>);

#[async_trait]
impl MessageHandler for CollectTimestamps {
    async fn handle(&self, payload: EachMessagePayload<'_>) -> Result<()> {
        let message = ChannelMessage::decode(payload.message)?;
        self.0.lock().unwrap().push(message.timestamp.parse()?);
        Ok(())
    }
}

fn bounded(sets: u64) -> RecordOptions {
    RecordOptions {
        every: Duration::from_millis(1),
        max_screenshot_sets: Some(sets),
    }
}

#[tokio::test]
async fn bounded_recording_publishes_one_message_per_display_per_cycle() {
    let ctx = test_context(Arc::new(FakeModels::default()));
    let recorder = Recorder::new(&ctx, two_screens());

    let summary = recorder.run(&bounded(3), &CancellationToken::new()).await.unwrap();
    assert_eq!(summary.cycles, 3);
    assert_eq!(summary.published, 6);
    assert_eq!(summary.failed_cycles, 0);

    let lag = channel::lag(&ctx.db, &ctx.config.channel.group_id, &ctx.config.channel.topic)
        .await
        .unwrap();
    assert_eq!(lag.log_end, 6);
    assert_eq!(lag.committed, None);
}

#[tokio::test]
async fn recording_pulls_missing_models_first() {
    let models = Arc::new(FakeModels::default());
    let ctx = test_context(models.clone());

    Recorder::new(&ctx, two_screens())
        .run(&bounded(1), &CancellationToken::new())
        .await
        .unwrap();
    let mut pulled = models.pulled.lock().unwrap().clone();
    pulled.sort();
    let mut expected: Vec<String> = ctx.config.models.all().iter().map(|m| m.to_string()).collect();
    expected.sort();
    assert_eq!(pulled, expected);

    // Already present: nothing to pull the second time.
    Recorder::new(&ctx, two_screens())
        .run(&bounded(1), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(models.pulled.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn failed_cycles_are_counted_and_the_timer_keeps_going() {
    let ctx = test_context(Arc::new(FakeModels::default()));
    let screen = two_screens();
    screen.fail.store(true, Ordering::SeqCst);

    let summary = Recorder::new(&ctx, screen.clone())
        .run(&bounded(2), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.cycles, 2);
    assert_eq!(summary.failed_cycles, 2);
    assert_eq!(summary.published, 0);
}

#[tokio::test]
async fn shutdown_stops_an_unbounded_recording() {
    let ctx = test_context(Arc::new(FakeModels::default()));
    let options = RecordOptions {
        every: Duration::from_millis(1),
        max_screenshot_sets: None,
    };

    let summary = Recorder::new(&ctx, two_screens())
        .run(&options, &drained())
        .await
        .unwrap();
    assert_eq!(summary.cycles, 0);

    let shutdown = CancellationToken::new();
    let recorder = Recorder::new(&ctx, two_screens());
    let stopper = shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        stopper.cancel();
    });
    let summary = recorder.run(&options, &shutdown).await.unwrap();
    assert!(summary.cycles >= 1);
}

#[tokio::test]
async fn recorded_captures_become_queryable_documents() {
    let ctx = test_context(Arc::new(FakeModels::default()));
    Recorder::new(&ctx, two_screens())
        .run(&bounded(1), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(describe_all(&ctx).await, 2);
    assert_eq!(ctx.collection().await.unwrap().count().await.unwrap(), 2);

    let options = QueryOptions {
        expand: false,
        max_results: 1,
    };
    let QueryOutcome::Answer { matches, .. } = query(&ctx, "which window was blue?", &options).await.unwrap() else {
        panic!("expected an answer");
    };
    assert!(matches[0].id.ends_with("-display-2-2"));
    assert_eq!(matches[0].payload.capture.display, display(2));
}

#[tokio::test]
async fn sub_second_interval_never_overwrites_earlier_captures() {
    let ctx = test_context(Arc::new(FakeModels::default()));
    let options = RecordOptions {
        every: Duration::from_millis(100),
        max_screenshot_sets: Some(3),
    };

    let summary = Recorder::new(&ctx, two_screens())
        .run(&options, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.published, 6);

    assert_eq!(describe_all(&ctx).await, 6);
    assert_eq!(ctx.collection().await.unwrap().count().await.unwrap(), 6);
}

#[tokio::test]
async fn back_to_back_cycles_get_increasing_timestamps() {
    let ctx = test_context(Arc::new(FakeModels::default()));
    let recorder = Recorder::new(&ctx, two_screens());
    for _ in 0..3 {
        assert_eq!(recorder.cycle().await.unwrap(), 2);
    }

    let collect = CollectTimestamps::default();
    ctx.consumer().await.unwrap().run(&collect, &drained()).await.unwrap();

    let stamps = collect.0.into_inner().unwrap();
    assert_eq!(stamps.len(), 6);
    for pair in stamps.chunks(2) {
        assert_eq!(pair[0], pair[1], "one timestamp per cycle");
    }
    assert!(stamps[1] < stamps[2] && stamps[3] < stamps[4]);
}
