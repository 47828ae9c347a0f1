//! Terminal chat driven by scripted input.

use std::io::Cursor;
use std::sync::Arc;

use donna::permission::PermissionDecision;
use donna::session::SessionService;
use donna::terminal::{TerminalChat, TerminalOptions};
use serde_json::json;
use tempfile::TempDir;

mod common;
use common::{ScriptedRuntime, Turn, session_config};

async fn chat(runtime: &ScriptedRuntime, input: &str, options: TerminalOptions) -> String {
    let data_dir = TempDir::new().unwrap();
    let sessions = SessionService::new(Arc::new(runtime.clone()), session_config(data_dir.path()));
    let mut session = sessions.create();

    let mut output = Vec::new();
    TerminalChat::new(Cursor::new(input.as_bytes().to_vec()), &mut output, options)
        .run(&mut session, std::future::pending())
        .await
        .unwrap();
    String::from_utf8(output).unwrap()
}

#[tokio::test]
async fn test_conversation_ends_with_context_update() {
    let runtime = ScriptedRuntime::new([
        Turn::reply("Added to your list."),
        Turn::reply("Context saved."),
    ]);

    let output = chat(&runtime, "buy milk\nexit\n", TerminalOptions::default()).await;

    assert!(output.contains("Donna: Added to your list."), "{output}");
    assert!(output.contains("Turns: 1"));
    assert!(output.contains("Updating context..."));
    assert!(!output.contains("Context saved."), "context update is quiet");
    assert!(output.trim_end().ends_with("Goodbye!"));

    let log = runtime.log();
    assert_eq!(log.submitted.len(), 2);
    assert_eq!(log.submitted[0], "buy milk");
    assert!(log.submitted[1].contains("current_context.md"), "{}", log.submitted[1]);
    assert!(log.closed);
}

#[tokio::test]
async fn test_end_of_input_says_goodbye() {
    let runtime = ScriptedRuntime::default();

    let output = chat(&runtime, "", TerminalOptions::default()).await;

    assert!(output.contains("Goodbye!"));
    assert_eq!(runtime.log().submitted.len(), 1);
}

#[tokio::test]
async fn test_permission_prompt_reads_answer_from_input() {
    let turn = Turn::new()
        .tool("toolu_1", "Bash", json!({ "command": "git status" }))
        .text("Your repo is clean.")
        .stats();
    let runtime = ScriptedRuntime::new([turn]);

    let output = chat(
        &runtime,
        "check my repo\ny\nquit\n",
        TerminalOptions {
            show_thinking: true,
            ..TerminalOptions::default()
        },
    )
    .await;

    assert!(output.contains("Donna wants to run: git status"), "{output}");
    assert!(output.contains("Allow this command? [y/N]"));
    assert!(output.contains("[tool result]\ndone"));
    assert_eq!(
        runtime.log().decisions,
        vec![("Bash".to_string(), PermissionDecision::Allow)]
    );
}
