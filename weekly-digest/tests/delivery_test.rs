mod common;

use anyhow::Result;
use tracing::info;

use common::{CountingGenerator, HarnessBuilder, RecordingChat};
use weekly_digest::{split_chunks, RunStatus, SubscriberMeta, Trigger};

fn long_report() -> String {
    (0..90).map(|i| format!("{:02} {}\n", i, "n".repeat(96))).collect()
}

#[tokio::test]
async fn test_one_failing_recipient_makes_run_partial() -> Result<()> {
    let report = long_report();
    assert_eq!(report.chars().count(), 9000);

    let h = HarnessBuilder::new()
        .chat(RecordingChat::new(4000).failing_for(&["2"]))
        .generator(CountingGenerator::new(report.clone()))
        .build();
    for id in ["1", "2", "3"] {
        h.store.subscribers.subscribe(id, SubscriberMeta::default())?;
    }

    let summary = h.orchestrator.run(Trigger::Scheduled).await?;
    info!("Tally: {:?}", summary.tally);

    assert_eq!(summary.status, RunStatus::Partial);
    assert_eq!(summary.status.exit_code(), 1);
    assert_eq!(summary.tally.fully_delivered, 2);
    assert_eq!(summary.tally.failed, 1);
    assert_eq!(summary.tally.partially_delivered, 0);
    assert_eq!(summary.delivery.attempted(), 9);
    assert_eq!(summary.delivery.failed_recipients(), vec!["2".to_string()]);

    for id in ["1", "3"] {
        let chunks = h.chat.sent_to(id);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 4000));
        assert_eq!(chunks.concat(), report);
    }
    assert!(h.chat.sent_to("2").is_empty());
    Ok(())
}

#[tokio::test]
async fn test_every_recipient_failing_marks_run_failed() -> Result<()> {
    let h = HarnessBuilder::new()
        .chat(RecordingChat::new(4000).failing_for(&["1", "2"]))
        .build();
    h.store.subscribers.subscribe("1", SubscriberMeta::default())?;
    h.store.subscribers.subscribe("2", SubscriberMeta::default())?;

    let summary = h.orchestrator.run(Trigger::Scheduled).await?;

    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.tally.failed, 2);
    // The report was still generated and cached.
    assert!(h.store.reports.load().is_some());
    Ok(())
}

#[tokio::test]
async fn test_small_chunk_limit_preserves_order() -> Result<()> {
    let report = "<b>Headline</b>\nfirst line\nsecond line\nthird line\n";
    let h = HarnessBuilder::new()
        .chat(RecordingChat::new(24))
        .generator(CountingGenerator::new(report))
        .build();
    h.store.subscribers.subscribe("9", SubscriberMeta::default())?;

    h.orchestrator.run(Trigger::Scheduled).await?;

    let sent = h.chat.sent_to("9");
    assert_eq!(sent, split_chunks(report, 24));
    assert!(sent.len() > 1);
    assert_eq!(sent.concat(), report);
    Ok(())
}
