/// Chat command handling against the same scripted site as the cycle tests.
mod support;

use autoapply::bot::commands::{Command, CommandHandler, HELP_TEXT};
use std::time::Duration;
use support::{Harness, Listing, RecordingReplier, Script};

fn handler(h: &Harness) -> CommandHandler {
    CommandHandler::new(h.state.clone())
}

#[tokio::test]
async fn test_unsolicited_otp_is_informational() {
    let h = Harness::new(Script::default(), &[]);
    let replier = RecordingReplier::default();

    handler(&h)
        .handle(Command::Otp(Some("123456".into())), 1, &replier)
        .await;

    assert_eq!(
        replier.replies(),
        vec!["ℹ️ No OTP was requested right now. I’ll ask again if needed.".to_string()]
    );
}

#[tokio::test]
async fn test_otp_without_code_gets_usage() {
    let h = Harness::new(Script::default(), &[]);
    let replier = RecordingReplier::default();

    handler(&h).handle(Command::Otp(None), 1, &replier).await;
    handler(&h)
        .handle(Command::Otp(Some("   ".into())), 1, &replier)
        .await;

    assert_eq!(replier.replies().len(), 2);
    assert!(replier.replies().iter().all(|r| r.contains("/otp 123456")));
}

#[tokio::test]
async fn test_status_reports_config_and_ledger() {
    let h = Harness::new(
        Script::default(),
        &[("EXCLUDE_KEYWORDS", "senior,lead"), ("MAX_APPLICATIONS_PER_RUN", "4")],
    );
    std::fs::write(h.ledger_path(), r#"["a","b"]"#).unwrap();
    let replier = RecordingReplier::default();

    handler(&h).handle(Command::Status, 1, &replier).await;

    let text = &replier.replies()[0];
    assert!(text.contains("Keywords: *Rust Developer* | Location: *Chennai*"));
    assert!(text.contains("Exclude: *senior,lead*"));
    assert!(text.contains("Max per run: *4*"));
    assert!(text.contains("Cookies saved: *No*"));
    assert!(text.contains("Applied log size: *2*"));
}

#[tokio::test]
async fn test_status_shows_dash_for_no_exclusions() {
    let h = Harness::new(Script::default(), &[]);
    assert!(handler(&h).status_text().contains("Exclude: *—*"));
}

#[tokio::test]
async fn test_start_registers_only_the_first_chat() {
    let h = Harness::new(Script::default(), &[]);
    let first = RecordingReplier::default();
    let second = RecordingReplier::default();

    handler(&h).handle(Command::Start, 77, &first).await;
    handler(&h).handle(Command::Start, 88, &second).await;

    let first = first.replies();
    assert_eq!(first.len(), 2);
    assert!(first[0].contains("Chat ID: `77`"));
    assert_eq!(first[1], HELP_TEXT);
    assert_eq!(second.replies(), vec![HELP_TEXT.to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_runnow_replies_with_outcome() {
    let h = Harness::new(
        Script {
            logged_in: true,
            listings: vec![Listing::applies("Rust Developer", "job-a")],
            ..Default::default()
        },
        &[],
    );
    let replier = RecordingReplier::default();

    handler(&h).handle(Command::RunNow, 1, &replier).await;

    let replies = replier.replies();
    assert_eq!(replies[0], "⏳ Running now…");
    assert!(replies[1].starts_with("✅ Done. Applied: *1*."));
    assert!(replies[1].contains("✅ Rust Developer…"));
}

#[tokio::test(start_paused = true)]
async fn test_otp_command_unblocks_a_waiting_runnow() {
    let h = Harness::new(
        Script {
            logged_in: false,
            otp_required: true,
            listings: vec![Listing::applies("Rust Developer", "job-a")],
            ..Default::default()
        },
        &[],
    );
    let run_replier = std::sync::Arc::new(RecordingReplier::default());
    let busy_replier = RecordingReplier::default();
    let otp_replier = RecordingReplier::default();

    let runner = {
        let handler = handler(&h);
        let replier = run_replier.clone();
        tokio::spawn(async move { handler.handle(Command::RunNow, 1, replier.as_ref()).await })
    };
    while !h.state.otp.is_pending() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    handler(&h).handle(Command::RunNow, 1, &busy_replier).await;
    assert!(busy_replier.replies()[1].contains("already running"));

    handler(&h)
        .handle(Command::Otp(Some("987654".into())), 1, &otp_replier)
        .await;
    assert_eq!(otp_replier.replies(), vec!["✅ OTP received. Proceeding…".to_string()]);

    runner.await.unwrap();
    let replies = run_replier.replies();
    assert!(replies[1].starts_with("✅ Done. Applied: *1*."));
}
