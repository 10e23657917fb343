#![allow(missing_docs, unused_results)]

use std::path::PathBuf;
use std::time::Duration;

use conduit_core::{AgentId, SessionId, Tool, ToolCallId, ToolContext, ToolResult, update_channel};
use conduit_exec::{BashTool, ProcessRunner};
use conduit_settings::ExecSettings;
use serde_json::{Value, json};

fn settings(spill_dir: Option<PathBuf>, max_lines: usize) -> ExecSettings {
    ExecSettings {
        spill_enabled: spill_dir.is_some(),
        spill_dir,
        max_lines,
        ..ExecSettings::default()
    }
}

fn ctx() -> ToolContext {
    ToolContext::new(
        ToolCallId::new(),
        SessionId::from_raw("sess_it"),
        AgentId::from_raw("main"),
        std::env::temp_dir(),
    )
}

fn detail<'a>(result: &'a ToolResult, key: &str) -> Option<&'a Value> {
    result.detail(key)
}

async fn bash(tool: &BashTool, command: &str) -> ToolResult {
    tool.execute(json!({ "command": command }), &ctx()).await.unwrap()
}

fn abort_after(ctx: &ToolContext, delay: Duration) {
    let signal = ctx.signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        signal.abort();
    });
}

#[tokio::test]
async fn echo_hello() {
    let tool = BashTool::new(ProcessRunner::new(settings(None, 2000)));
    let result = bash(&tool, "echo hello").await;
    assert!(result.text_content().contains("hello"));
    assert_eq!(detail(&result, "exit_code"), Some(&json!(0)));
}

#[tokio::test]
async fn sleep_with_one_second_timeout() {
    let tool = BashTool::new(ProcessRunner::new(settings(None, 2000)));
    let started = std::time::Instant::now();
    let result = tool
        .execute(json!({"command": "sleep 10", "timeout": 1}), &ctx())
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(result.text_content().contains("timed out after 1 second"));
    assert!(detail(&result, "exit_code").is_none());
    assert_eq!(detail(&result, "timed_out"), Some(&json!(true)));
}

#[tokio::test]
async fn abort_keeps_output_before_abort_only() {
    let tool = BashTool::new(ProcessRunner::new(settings(None, 2000)));
    let ctx = ctx();
    abort_after(&ctx, Duration::from_millis(100));

    let started = std::time::Instant::now();
    let result = tool
        .execute(json!({"command": "echo started; sleep 10; echo finished"}), &ctx)
        .await
        .unwrap();
    let text = result.text_content();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(text.contains("started"));
    assert!(text.contains("cancelled"));
    assert!(!text.contains("finished"));
    assert!(detail(&result, "exit_code").is_none());
    assert_eq!(detail(&result, "cancelled"), Some(&json!(true)));
}

#[tokio::test]
async fn long_output_keeps_tail_and_spills_full_output() {
    let dir = tempfile::tempdir().unwrap();
    let tool = BashTool::new(ProcessRunner::new(settings(Some(dir.path().to_path_buf()), 100)));
    let result = bash(&tool, "seq 1 3000").await;
    let text = result.text_content();

    assert_eq!(detail(&result, "truncated"), Some(&json!(true)));
    assert_eq!(detail(&result, "total_lines"), Some(&json!(3000)));
    assert!(text.starts_with("[Output truncated. Showing last 100 of 3000 lines."));
    assert!(text.trim_end().ends_with("3000"));
    assert!(!text.contains("\n2900\n"));

    let path = detail(&result, "full_output_path").and_then(Value::as_str).unwrap();
    assert!(text.contains(path));
    let full = std::fs::read_to_string(path).unwrap();
    assert_eq!(full.lines().count(), 3000);
    assert_eq!(full.lines().next(), Some("1"));
}

#[tokio::test]
async fn short_output_is_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let tool = BashTool::new(ProcessRunner::new(settings(Some(dir.path().to_path_buf()), 100)));
    let result = bash(&tool, "seq 1 100").await;
    assert_eq!(detail(&result, "truncated"), Some(&json!(false)));
    assert!(detail(&result, "full_output_path").is_none());
    assert!(result.text_content().starts_with("1\n2\n"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn wide_output_under_line_limit_is_not_truncated() {
    let dir = tempfile::tempdir().unwrap();
    let tool = BashTool::new(ProcessRunner::new(settings(Some(dir.path().to_path_buf()), 2000)));
    let result = bash(&tool, "for i in $(seq 1 1500); do printf '%01000d\\n' $i; done").await;
    let text = result.text_content();
    assert_eq!(detail(&result, "truncated"), Some(&json!(false)));
    assert_eq!(detail(&result, "total_lines"), Some(&json!(1500)));
    assert!(detail(&result, "full_output_path").is_none());
    assert!(!text.contains("[Output truncated"));
    assert_eq!(text.len(), 1500 * 1001);
    assert_eq!(text.lines().next(), Some(format!("{:01000}", 1).as_str()));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn updates_never_shrink_when_output_crosses_line_limit() {
    let tool = BashTool::new(ProcessRunner::new(settings(None, 3)));
    let (tx, mut rx) = update_channel();
    let ctx = ctx().with_updates(tx);
    let command = "for i in 1 2 3; do printf '%0100d\\n' $i; done; sleep 0.3; echo b";
    let result = tool.execute(json!({ "command": command }), &ctx).await.unwrap();
    drop(ctx);

    let mut sizes = Vec::new();
    let mut last = None;
    while let Some(update) = rx.recv().await {
        sizes.push(update.text_len());
        last = Some(update);
    }
    assert!(sizes.len() >= 2, "sizes: {sizes:?}");
    assert!(sizes.windows(2).all(|w| w[0] <= w[1]), "sizes: {sizes:?}");
    assert_eq!(last.unwrap(), result);
    assert_eq!(detail(&result, "truncated"), Some(&json!(true)));
    assert!(result.text_content().ends_with("\nb\n"));
}

#[tokio::test]
async fn large_output_without_listener_finishes_quickly() {
    let tool = BashTool::new(ProcessRunner::new(settings(None, 2000)));
    let started = std::time::Instant::now();
    let result = bash(&tool, "seq 1 3000000").await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(detail(&result, "total_lines"), Some(&json!(3_000_000)));
    assert!(result.text_content().ends_with("2999999\n3000000\n"));
}

#[tokio::test]
async fn carriage_returns_count_as_lines_and_ansi_is_stripped() {
    let tool = BashTool::new(ProcessRunner::new(settings(None, 2000)));
    let result = bash(&tool, r"printf 'a\r\nb\rc\n\033[31mred\033[0m\n'").await;
    assert_eq!(result.text_content(), "a\nb\nc\nred\n");
    assert_eq!(detail(&result, "total_lines"), Some(&json!(4)));
}

#[tokio::test]
async fn multibyte_output_survives_truncation() {
    let tool = BashTool::new(ProcessRunner::new(settings(None, 5)));
    let result = bash(&tool, "for i in $(seq 1 50); do echo \"héllo wörld ✓ $i\"; done").await;
    let text = result.text_content();
    assert!(text.contains("héllo wörld ✓ 50"));
    assert!(!text.contains('\u{FFFD}'));
}

#[tokio::test]
async fn streaming_updates_grow_and_end_with_final_result() {
    let tool = BashTool::new(ProcessRunner::new(settings(None, 2000)));
    let (tx, mut rx) = update_channel();
    let ctx = ctx().with_updates(tx);
    let result = tool
        .execute(
            json!({"command": "for i in 1 2 3 4 5; do echo line $i; sleep 0.05; done"}),
            &ctx,
        )
        .await
        .unwrap();
    drop(ctx);

    let mut lengths = Vec::new();
    let mut last = None;
    while let Some(update) = rx.recv().await {
        lengths.push(update.text_len());
        last = Some(update);
    }
    assert!(lengths.len() >= 2);
    assert!(lengths.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(last.unwrap(), result);
}

#[tokio::test]
async fn rapid_repeated_aborts_leave_nothing_running() {
    let runner = ProcessRunner::new(settings(None, 2000));
    let tool = BashTool::new(runner.clone());
    for _ in 0..10 {
        let ctx = ctx();
        abort_after(&ctx, Duration::from_millis(20));
        let result = tool
            .execute(json!({"command": "sleep 5 & sleep 5; wait"}), &ctx)
            .await
            .unwrap();
        assert_eq!(detail(&result, "cancelled"), Some(&json!(true)));
        // aborting again is harmless
        ctx.signal.abort();
    }
    assert_eq!(runner.active_count(), 0);
}

#[tokio::test]
async fn background_descendants_are_killed_on_abort() {
    let tool = BashTool::new(ProcessRunner::new(settings(None, 2000)));
    let ctx = ctx();
    abort_after(&ctx, Duration::from_millis(200));
    let result = tool
        .execute(json!({"command": "sleep 30 & echo pid=$!; wait"}), &ctx)
        .await
        .unwrap();
    let text = result.text_content();
    let pid: u32 = text
        .lines()
        .find_map(|l| l.strip_prefix("pid="))
        .and_then(|p| p.trim().parse().ok())
        .unwrap();

    let mut gone = false;
    for _ in 0..50 {
        let stat = std::fs::read_to_string(format!("/proc/{pid}/stat"));
        // a zombie waiting for its new parent to reap it is dead too
        if stat.map_or(true, |s| s.contains(") Z ")) {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(gone, "background sleep {pid} survived the abort");
}

#[tokio::test]
async fn missing_working_directory_is_reported_not_raised() {
    let tool = BashTool::new(ProcessRunner::new(settings(None, 2000)));
    let ctx = ToolContext::new(
        ToolCallId::new(),
        SessionId::from_raw("sess_it"),
        AgentId::from_raw("main"),
        "/definitely/not/a/dir",
    );
    let result = tool.execute(json!({"command": "echo hi"}), &ctx).await.unwrap();
    assert!(detail(&result, "spawn_error").is_some());
    assert!(detail(&result, "exit_code").is_none());
    assert!(result.text_content().contains("Failed to start"));
}
