use super::*;
use crate::testing::{judgment_json, FakeEmbedder, FakeJudge, FakeReply};
use tempfile::TempDir;

fn setup_test_db() -> (TempDir, Arc<Database>) {
    let temp_dir = TempDir::new().unwrap();
    let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
    (temp_dir, Arc::new(db))
}

fn test_settings(batch_size: usize) -> Settings {
    let mut settings = Settings::default();
    settings.indexer.batch_size = batch_size;
    settings.retry.base_delay_ms = 1;
    settings.retry.max_delay_ms = 2;
    settings.retry.call_timeout_secs = 5;
    settings
}

fn video() -> VideoMetadata {
    VideoMetadata {
        filename: "grand_prix.mp4".into(),
        duration: 300.0,
        fps: 25.0,
        width: 1280,
        height: 720,
    }
}

/// One span per label, 10s apart so none are merged.
fn spans(labels: &[&str]) -> Vec<TranscriptSpan> {
    labels
        .iter()
        .enumerate()
        .map(|(i, label)| TranscriptSpan {
            start: i as f64 * 10.0,
            end: i as f64 * 10.0 + 5.0,
            text: format!("{} the driver dives down the inside at turn one", label),
        })
        .collect()
}

fn pipeline(
    db: &Arc<Database>,
    judge: Arc<FakeJudge>,
    embedder: Arc<FakeEmbedder>,
    batch_size: usize,
) -> HighlightPipeline {
    HighlightPipeline::new(&test_settings(batch_size), db.clone(), judge, embedder).unwrap()
}

fn scored_judge() -> FakeJudge {
    FakeJudge::new()
        .reply("alpha", FakeReply::Json(judgment_json(8, "Late braking overtake")))
        .reply("bravo", FakeReply::Json(judgment_json(7, "Wheel to wheel battle")))
        .reply("charlie", FakeReply::Json(judgment_json(3, "Quiet lap")))
}

#[tokio::test]
async fn test_scores_8_7_3_yield_two_highlights() {
    let (_dir, db) = setup_test_db();
    let judge = Arc::new(scored_judge());
    let p = pipeline(&db, judge, Arc::new(FakeEmbedder::new(8)), 16);

    let report = p
        .run(&video(), &spans(&["alpha", "bravo", "charlie"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.segments, 3);
    assert_eq!(report.accepted, 2);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.persisted, 2);
    assert!(report.failed_batches.is_empty());

    let highlights = db.get_video_highlights(report.video_id).unwrap();
    assert_eq!(highlights.len(), 2);
    assert_eq!(highlights[0].description, "Late braking overtake");
    assert_eq!(highlights[0].timestamp, 2.5);
    assert_eq!(highlights[1].description, "Wheel to wheel battle");
    assert_eq!(highlights[1].timestamp, 12.5);
    assert!(highlights.iter().all(|h| h.embedding.len() == 8));
}

#[tokio::test]
async fn test_only_scores_at_or_above_threshold_are_stored() {
    let (_dir, db) = setup_test_db();
    let labels = ["s01", "s02", "s03", "s04", "s05", "s06", "s07", "s08", "s09", "s10"];
    let mut judge = FakeJudge::new();
    for (i, label) in labels.iter().enumerate() {
        judge = judge.reply(
            label,
            FakeReply::Json(judgment_json(i as u8 + 1, &format!("moment {}", label))),
        );
    }
    let p = pipeline(&db, Arc::new(judge), Arc::new(FakeEmbedder::new(8)), 3);

    let report = p
        .run(&video(), &spans(&labels), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.persisted, 5);
    let highlights = db.get_video_highlights(report.video_id).unwrap();
    assert_eq!(highlights.len(), 5);
    assert!(highlights.iter().all(|h| h.quality_score >= 6));
}

#[tokio::test]
async fn test_repeated_runs_are_idempotent() {
    let (_dir, db) = setup_test_db();
    let labels = ["alpha", "bravo", "charlie"];

    let first = pipeline(&db, Arc::new(scored_judge()), Arc::new(FakeEmbedder::new(8)), 16)
        .run(&video(), &spans(&labels), &CancellationToken::new())
        .await
        .unwrap();
    let before = db.get_video_highlights(first.video_id).unwrap();

    let second = pipeline(&db, Arc::new(scored_judge()), Arc::new(FakeEmbedder::new(8)), 16)
        .run(&video(), &spans(&labels), &CancellationToken::new())
        .await
        .unwrap();
    let after = db.get_video_highlights(second.video_id).unwrap();

    assert_eq!(first.video_id, second.video_id);
    assert_eq!(db.get_videos().unwrap().len(), 1);
    assert_eq!(second.persisted, 0);
    assert_eq!(second.skipped_existing, 2);
    assert_ne!(first.run_id, second.run_id);

    let key = |h: &crate::database::Highlight| (h.id, h.timestamp, h.description.clone(), h.embedding.clone());
    assert_eq!(
        before.iter().map(key).collect::<Vec<_>>(),
        after.iter().map(key).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_fresh_stores_get_identical_highlights() {
    let labels = ["alpha", "bravo", "charlie"];
    let mut results = Vec::new();
    for _ in 0..2 {
        let (_dir, db) = setup_test_db();
        let report = pipeline(&db, Arc::new(scored_judge()), Arc::new(FakeEmbedder::new(8)), 1)
            .run(&video(), &spans(&labels), &CancellationToken::new())
            .await
            .unwrap();
        let rows: Vec<_> = db
            .get_video_highlights(report.video_id)
            .unwrap()
            .into_iter()
            .map(|h| (h.timestamp, h.description, h.category, h.quality_score, h.embedding))
            .collect();
        results.push(rows);
    }
    assert_eq!(results[0], results[1]);
}

#[tokio::test]
async fn test_partial_embedding_batch_stores_nothing() {
    let (_dir, db) = setup_test_db();
    let labels = ["e1", "e2", "e3", "e4", "e5"];
    let judge = FakeJudge::new().default_reply(FakeReply::Json(judgment_json(9, "Big moment")));
    let embedder = FakeEmbedder::new(8).short_on("Big moment");
    let p = pipeline(&db, Arc::new(judge), Arc::new(embedder), 5);

    let report = p
        .run(&video(), &spans(&labels), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.accepted, 5);
    assert_eq!(report.persisted, 0);
    assert_eq!(report.failed_batches.len(), 1);
    assert_eq!(report.failed_batches[0].highlights, 5);
    assert_eq!(db.count_highlights().unwrap(), 0);

    let stored = db.get_video(report.video_id).unwrap().unwrap();
    assert_eq!(stored.summary.as_deref(), Some(EMPTY_VIDEO_SUMMARY));
}

#[tokio::test]
async fn test_malformed_then_valid_answer_is_accepted() {
    let (_dir, db) = setup_test_db();
    let judge = Arc::new(FakeJudge::new().replies(
        "alpha",
        vec![
            FakeReply::Json("This one is great, 9/10".into()),
            FakeReply::Json(judgment_json(9, "Photo finish")),
        ],
    ));
    let p = pipeline(&db, judge.clone(), Arc::new(FakeEmbedder::new(8)), 16);

    let report = p
        .run(&video(), &spans(&["alpha"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.accepted, 1);
    assert_eq!(report.persisted, 1);
    assert_eq!(judge.calls_for("alpha"), 2);
}

#[tokio::test]
async fn test_two_malformed_answers_drop_the_segment() {
    let (_dir, db) = setup_test_db();
    let judge = Arc::new(
        FakeJudge::new()
            .reply("alpha", FakeReply::Json(r#"{"importance_score": 42}"#.into()))
            .reply("bravo", FakeReply::Json(judgment_json(8, "Pit stop drama"))),
    );
    let p = pipeline(&db, judge.clone(), Arc::new(FakeEmbedder::new(8)), 16);

    let report = p
        .run(&video(), &spans(&["alpha", "bravo"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.dropped, 1);
    assert_eq!(report.accepted, 1);
    assert_eq!(report.persisted, 1);
    assert_eq!(judge.calls_for("alpha"), 2);
}

#[tokio::test]
async fn test_prefilter_keeps_short_and_filler_segments_from_the_judge() {
    let (_dir, db) = setup_test_db();
    let judge = Arc::new(FakeJudge::new().default_reply(FakeReply::Json(judgment_json(8, "Moment"))));
    let p = pipeline(&db, judge.clone(), Arc::new(FakeEmbedder::new(8)), 16);
    let spans = vec![
        TranscriptSpan {
            start: 0.0,
            end: 5.0,
            text: "Too short".into(),
        },
        TranscriptSpan {
            start: 10.0,
            end: 15.0,
            text: "um uh like yeah so um okay".into(),
        },
        TranscriptSpan {
            start: 20.0,
            end: 21.0,
            text: "A brief but complete sentence".into(),
        },
        TranscriptSpan {
            start: 30.0,
            end: 36.0,
            text: "The safety car is deployed after the crash".into(),
        },
    ];

    let report = p.run(&video(), &spans, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.segments, 4);
    assert_eq!(report.filtered, 3);
    assert_eq!(judge.total_calls(), 1);
    assert_eq!(judge.calls_for("safety car"), 1);
    assert_eq!(report.persisted, 1);
}

#[tokio::test]
async fn test_invalid_spans_are_counted_not_fatal() {
    let (_dir, db) = setup_test_db();
    let judge = Arc::new(scored_judge());
    let p = pipeline(&db, judge, Arc::new(FakeEmbedder::new(8)), 16);
    let mut input = spans(&["alpha"]);
    input.push(TranscriptSpan {
        start: 50.0,
        end: 40.0,
        text: "this span ends before it starts".into(),
    });

    let report = p.run(&video(), &input, &CancellationToken::new()).await.unwrap();

    assert_eq!(report.invalid_spans, 1);
    assert_eq!(report.persisted, 1);
}

#[tokio::test]
async fn test_summary_is_written_from_stored_highlights() {
    let (_dir, db) = setup_test_db();
    let judge = Arc::new(scored_judge());
    let p = pipeline(&db, judge.clone(), Arc::new(FakeEmbedder::new(8)), 16);

    let report = p
        .run(&video(), &spans(&["alpha", "bravo", "charlie"]), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.summary_updated);
    let stored = db.get_video(report.video_id).unwrap().unwrap();
    assert_eq!(stored.summary.as_deref(), Some("A recap of the best moments."));

    let prompts = judge.summary_prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("- At 2.5s: Late braking overtake"));
    assert!(prompts[0].contains("- At 12.5s: Wheel to wheel battle"));
    assert!(!prompts[0].contains("Quiet lap"));
}

#[tokio::test]
async fn test_summary_failure_does_not_fail_the_run() {
    let (_dir, db) = setup_test_db();
    let judge = Arc::new(scored_judge().summary_reply(FakeReply::Fatal));
    let p = pipeline(&db, judge, Arc::new(FakeEmbedder::new(8)), 16);

    let report = p
        .run(&video(), &spans(&["alpha"]), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.summary_updated);
    assert_eq!(report.persisted, 1);
    let stored = db.get_video(report.video_id).unwrap().unwrap();
    assert!(stored.summary.is_none());
}

#[tokio::test]
async fn test_invalid_video_metadata_fails_the_run() {
    let (_dir, db) = setup_test_db();
    let p = pipeline(&db, Arc::new(scored_judge()), Arc::new(FakeEmbedder::new(8)), 16);
    let mut bad = video();
    bad.duration = f64::NAN;

    let result = p.run(&bad, &spans(&["alpha"]), &CancellationToken::new()).await;

    assert!(matches!(result, Err(AppError::Validation(_))));
    assert!(db.get_videos().unwrap().is_empty());
}

#[tokio::test]
async fn test_highlights_past_the_video_end_are_dropped() {
    let (_dir, db) = setup_test_db();
    let judge = Arc::new(scored_judge());
    let p = pipeline(&db, judge, Arc::new(FakeEmbedder::new(8)), 16);
    let mut short = video();
    short.filename = "short_clip.mp4".into();
    short.duration = 11.0;

    let report = p
        .run(&short, &spans(&["alpha", "bravo"]), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.accepted, 2);
    assert_eq!(report.out_of_bounds, 1);
    assert_eq!(report.persisted, 1);
}

#[tokio::test]
async fn test_cancelled_run_stores_nothing() {
    let (_dir, db) = setup_test_db();
    let judge = Arc::new(scored_judge());
    let p = pipeline(&db, judge.clone(), Arc::new(FakeEmbedder::new(8)), 16);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = p.run(&video(), &spans(&["alpha", "bravo"]), &cancel).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(judge.total_calls(), 0);
    assert_eq!(db.count_highlights().unwrap(), 0);
}

#[tokio::test]
async fn test_cancel_during_assessment_returns_promptly() {
    let (_dir, db) = setup_test_db();
    let slow = std::time::Duration::from_secs(30);
    let judge = Arc::new(
        scored_judge()
            .default_reply(FakeReply::Json(judgment_json(9, "Pit stop")))
            .delay("bravo", slow)
            .delay("charlie", slow)
            .delay("delta", slow)
            .delay("echo", slow)
            .delay("foxtrot", slow),
    );
    let p = pipeline(&db, judge.clone(), Arc::new(FakeEmbedder::new(8)), 16);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let report = p
        .run(
            &video(),
            &spans(&["alpha", "bravo", "charlie", "delta", "echo", "foxtrot"]),
            &cancel,
        )
        .await
        .unwrap();

    assert!(started.elapsed() < std::time::Duration::from_secs(5));
    assert!(report.cancelled);
    assert_eq!(report.accepted, 1);
    assert_eq!(report.persisted, 0);
    assert_eq!(judge.calls_for("foxtrot"), 0);
    assert!(judge.summary_prompts().is_empty());
    assert_eq!(db.count_highlights().unwrap(), 0);
}
