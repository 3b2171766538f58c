use std::io::{self, Write};

use chat_bridge_core::ai::{ScriptedBackend, ScriptedReply};
use chat_bridge_core::protocol::unescape_newlines;
use chat_bridge_core::{ChatMessage, ChatRole, LineWriter, Session, SessionConfig};
use chrono::{NaiveDate, NaiveDateTime};

fn morning() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, 6)
        .unwrap()
        .and_hms_opt(8, 15, 0)
        .unwrap()
}

fn config() -> SessionConfig {
    SessionConfig {
        model_id: "gemma3:12b".into(),
        summary_model: "gemma3:12b".into(),
        system_prompt: "You are a cheerful assistant.".into(),
        ollama_url: None,
    }
}

fn new_session(replies: Vec<ScriptedReply>) -> Session<ScriptedBackend> {
    Session::new(ScriptedBackend::new(replies), config()).with_clock(morning)
}

async fn run_lines<W: Write>(
    session: &mut Session<ScriptedBackend>,
    input: &str,
    writer: W,
) -> LineWriter<W> {
    let mut out = LineWriter::new(writer);
    session.run(input.as_bytes(), &mut out).await.unwrap();
    out
}

async fn run(session: &mut Session<ScriptedBackend>, input: &str) -> Vec<String> {
    let out = run_lines(session, input, Vec::new()).await;
    String::from_utf8(out.into_inner())
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Writer that rejects the first write containing `fail_on`.
struct FlakyWriter {
    written: Vec<u8>,
    fail_on: Option<&'static str>,
}

impl Write for FlakyWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(needle) = self.fail_on {
            if String::from_utf8_lossy(buf).contains(needle) {
                self.fail_on = None;
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));
            }
        }
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn plain_turns_grow_history_by_two() {
    let mut session = new_session(vec![
        ScriptedReply::Fragments(vec!["Good ".into(), "morning!".into()]),
        ScriptedReply::text("Sure."),
    ]);

    let lines = run(&mut session, "hello\nhow are you?\n").await;

    assert_eq!(
        lines,
        vec![
            "READY",
            "TOKEN:[Thinking]",
            "TOKEN:Good ",
            "TOKEN:morning!",
            "TOKEN:[DONE]",
            "TOKEN:[Thinking]",
            "TOKEN:Sure.",
            "TOKEN:[DONE]",
        ]
    );

    let history = session.history().messages();
    assert_eq!(history.len(), 5);
    assert_eq!(history[0], ChatMessage::system("You are a cheerful assistant."));
    let roles: Vec<ChatRole> = history.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            ChatRole::System,
            ChatRole::User,
            ChatRole::Assistant,
            ChatRole::User,
            ChatRole::Assistant,
        ]
    );
    assert!(history[1].content.contains("It is currently Morning."));
    assert_eq!(history[2].content, "Good morning!");
}

#[tokio::test]
async fn newlines_are_escaped_on_the_wire_and_kept_in_history() {
    let mut session = new_session(vec![ScriptedReply::text("a\nb\r\nc")]);

    let lines = run(&mut session, "write three lines\n").await;

    assert_eq!(lines[2], "TOKEN:a[NEWLINE]b[NEWLINE]c");
    assert_eq!(session.history().messages()[2].content, "a\nb\r\nc");

    let rendered: String = lines[2]
        .strip_prefix("TOKEN:")
        .map(unescape_newlines)
        .unwrap();
    assert_eq!(rendered, "a\nb\nc");
}

#[tokio::test]
async fn restore_with_empty_turns_keeps_system_and_greeting() {
    let mut session = new_session(vec![
        ScriptedReply::text("first"),
        ScriptedReply::text("Welcome back!"),
    ]);

    let lines = run(&mut session, "hi\nRESTORE_AND_GREET:[]\n").await;

    assert_eq!(
        session.history().messages(),
        &[
            ChatMessage::system("You are a cheerful assistant."),
            ChatMessage::assistant("Welcome back!"),
        ]
    );
    assert!(lines.iter().all(|line| !line.contains("HIDDEN CONTEXT")));
    assert_eq!(lines.last().unwrap(), "TOKEN:[DONE]");
}

#[tokio::test]
async fn restore_with_bad_role_is_rejected_whole() {
    let mut session = new_session(vec![ScriptedReply::text("first")]);

    let lines = run(
        &mut session,
        "hi\nRESTORE_AND_GREET:[{\"role\":\"user\",\"content\":\"x\"},{\"role\":\"robot\",\"content\":\"y\"}]\n",
    )
    .await;

    assert_eq!(session.history().len(), 3);
    assert_eq!(
        &lines[lines.len() - 2..],
        &[
            "TOKEN:Error restoring history: entry 1 has unsupported role 'robot'".to_string(),
            "TOKEN:[DONE]".to_string(),
        ]
    );
}

#[tokio::test]
async fn summarize_never_touches_history() {
    let mut session = new_session(vec![
        ScriptedReply::text("Hi there"),
        ScriptedReply::text("The user greeted the assistant."),
    ]);

    run(&mut session, "hi\n").await;
    let before = session.history().clone();

    let lines = run(
        &mut session,
        "SUMMARIZE:{\"previous_summary\":\"\",\"messages\":[{\"role\":\"user\",\"content\":\"hi\"}]}\n",
    )
    .await;

    assert_eq!(session.history(), &before);
    assert_eq!(
        lines,
        vec!["READY", "SUMMARY_RESULT:The user greeted the assistant."]
    );
}

#[tokio::test]
async fn malformed_summarize_reports_one_line() {
    let mut session = new_session(vec![]);
    let before = session.history().clone();

    let lines = run(&mut session, "SUMMARIZE:{oops\n").await;

    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("SUMMARY_RESULT:Error summarizing: invalid JSON"));
    assert_eq!(session.history(), &before);
    assert!(session.backend().requests().is_empty());
}

#[tokio::test]
async fn backend_failure_still_pairs_the_turn() {
    let mut session = new_session(vec![ScriptedReply::Fail("connection refused".into())]);

    let lines = run(&mut session, "hello\n").await;

    assert_eq!(
        lines,
        vec![
            "READY",
            "TOKEN:[Thinking]",
            "TOKEN:Backend error: connection refused",
            "TOKEN:[DONE]",
        ]
    );
    let history = session.history().messages();
    assert_eq!(history.len(), 3);
    assert_eq!(
        history[2],
        ChatMessage::assistant("Backend error: connection refused")
    );
}

#[tokio::test]
async fn mid_stream_failure_stores_only_the_error() {
    let mut session = new_session(vec![ScriptedReply::FailAfter(
        vec!["partial".into()],
        "reset".into(),
    )]);

    let lines = run(&mut session, "hello\n").await;

    assert_eq!(
        lines,
        vec![
            "READY",
            "TOKEN:[Thinking]",
            "TOKEN:partial",
            "TOKEN:[NEWLINE]Backend error: reset",
            "TOKEN:[DONE]",
        ]
    );
    assert_eq!(
        session.history().messages()[2],
        ChatMessage::assistant("Backend error: reset")
    );
}

#[tokio::test]
async fn exit_stops_before_remaining_lines() {
    let mut session = new_session(vec![ScriptedReply::text("one")]);

    let lines = run(&mut session, "hi\nEXIT\nthis is never read\n").await;

    assert_eq!(lines.len(), 4);
    assert_eq!(lines.last().unwrap(), "TOKEN:[DONE]");
    assert_eq!(session.history().len(), 3);
    assert_eq!(session.backend().requests().len(), 1);
}

#[tokio::test]
async fn exit_on_fresh_session_produces_only_ready() {
    let mut session = new_session(vec![]);

    let lines = run(&mut session, "EXIT\n").await;

    assert_eq!(lines, vec!["READY"]);
}

#[tokio::test]
async fn end_of_input_without_newline_still_handles_last_line() {
    let mut session = new_session(vec![ScriptedReply::text("answer")]);

    let lines = run(&mut session, "last words").await;

    assert_eq!(lines.last().unwrap(), "TOKEN:[DONE]");
    assert_eq!(session.history().len(), 3);
}

#[tokio::test]
async fn empty_input_ends_the_loop() {
    let mut session = new_session(vec![]);

    let lines = run(&mut session, "").await;

    assert_eq!(lines, vec!["READY"]);
    assert_eq!(session.history().len(), 1);
}

#[tokio::test]
async fn invalid_utf8_does_not_stop_the_loop() {
    let mut session = new_session(vec![ScriptedReply::text("a"), ScriptedReply::text("b")]);
    let mut out = LineWriter::new(Vec::new());

    let input: &[u8] = b"caf\xff\nsecond\n";
    session.run(input, &mut out).await.unwrap();

    assert_eq!(session.history().len(), 5);
    assert!(session.history().messages()[1].content.ends_with("caf\u{fffd}"));
}

#[tokio::test]
async fn output_fault_is_reported_and_loop_continues() {
    let mut session = new_session(vec![ScriptedReply::text("recovered")]);
    let writer = FlakyWriter {
        written: Vec::new(),
        fail_on: Some("[Thinking]"),
    };

    let out = run_lines(&mut session, "first\nsecond\n", writer).await;

    let text = String::from_utf8(out.get_ref().written.clone()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "READY");
    assert!(lines[1].starts_with("TOKEN:Critical error: I/O error: pipe closed"));
    assert_eq!(lines[2], "TOKEN:[DONE]");
    assert_eq!(
        &lines[3..],
        &["TOKEN:[Thinking]", "TOKEN:recovered", "TOKEN:[DONE]"]
    );

    // The failed turn left its user entry unpaired; the next one completed.
    let roles: Vec<ChatRole> = session.history().messages().iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![
            ChatRole::System,
            ChatRole::User,
            ChatRole::User,
            ChatRole::Assistant,
        ]
    );
}

#[tokio::test]
async fn tool_result_round_trip() {
    let mut session = new_session(vec![
        ScriptedReply::text(
            "Let me calculate.\nTOOL_REQUEST: { \"tool\": \"run_python\", \"params\": { \"code\": \"print(100 * 24)\" } }",
        ),
        ScriptedReply::text("The answer is 2400."),
    ]);

    let lines = run(
        &mut session,
        "what is 100 * 24?\nTOOL_RESULT: {\"output\":\"2400\"}\n",
    )
    .await;

    assert!(lines.contains(
        &"TOKEN:Let me calculate.[NEWLINE]TOOL_REQUEST: { \"tool\": \"run_python\", \"params\": { \"code\": \"print(100 * 24)\" } }"
            .to_string()
    ));

    let history = session.history().messages();
    assert_eq!(history.len(), 5);
    assert!(history[2].content.contains("TOOL_REQUEST:"));
    assert!(history[3].content.starts_with("TOOL_RESULT:\n{\"output\":\"2400\"}"));
    assert_eq!(history[4].content, "The answer is 2400.");
}

#[tokio::test]
async fn every_generation_is_framed_once() {
    let mut session = new_session(vec![
        ScriptedReply::text("x"),
        ScriptedReply::FailAfter(vec!["half".into()], "boom".into()),
        ScriptedReply::text("y"),
    ]);

    let lines = run(&mut session, "one\ntwo\nRESTORE_AND_GREET:[]\n").await;

    let thinking = lines.iter().filter(|l| *l == "TOKEN:[Thinking]").count();
    let done = lines.iter().filter(|l| *l == "TOKEN:[DONE]").count();
    assert_eq!(thinking, 3);
    assert_eq!(done, 3);

    // Thinking and Done strictly alternate.
    let markers: Vec<&str> = lines
        .iter()
        .filter(|l| *l == "TOKEN:[Thinking]" || *l == "TOKEN:[DONE]")
        .map(String::as_str)
        .collect();
    for pair in markers.chunks(2) {
        assert_eq!(pair, ["TOKEN:[Thinking]", "TOKEN:[DONE]"]);
    }
}
