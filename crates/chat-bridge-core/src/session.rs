//! The resident read-line loop and its command handlers.
//!
//! One line is read, handled to completion (including the whole streamed
//! generation), and only then is the next line read. Handler failures are
//! reported on the token channel and the loop keeps going; only `EXIT` or the
//! end of input stops it.

use std::fmt;
use std::io::Write;

use chrono::{Local, NaiveDateTime, Timelike};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::ai::{ChatBackend, ChatRequest};
use crate::command::{self, Command, SummarizeRequest};
use crate::driver;
use crate::error::{PayloadError, Result};
use crate::protocol::{LineWriter, Outbound};
use crate::state::{ChatMessage, History, SessionConfig};
use crate::tool_request;

/// Whether the loop should keep reading after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Source of the local wall-clock time used in time annotations.
pub type Clock = fn() -> NaiveDateTime;

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPeriod {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl DayPeriod {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => DayPeriod::Morning,
            12..=17 => DayPeriod::Afternoon,
            18..=21 => DayPeriod::Evening,
            _ => DayPeriod::Night,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DayPeriod::Morning => "Morning",
            DayPeriod::Afternoon => "Afternoon",
            DayPeriod::Evening => "Evening",
            DayPeriod::Night => "Night",
        }
    }
}

impl fmt::Display for DayPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Formatted timestamp plus its period of the day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeContext {
    pub stamp: String,
    pub period: DayPeriod,
}

impl TimeContext {
    pub fn at(now: NaiveDateTime) -> Self {
        Self {
            stamp: now.format("%Y-%m-%d %H:%M:%S %A").to_string(),
            period: DayPeriod::from_hour(now.hour()),
        }
    }
}

pub fn timed_user_message(time: &TimeContext, text: &str) -> String {
    format!(
        "[System Info: Current Time is {}. It is currently {}.]\n{}",
        time.stamp, time.period, text
    )
}

pub fn tool_result_message(payload: &str) -> String {
    format!(
        "TOOL_RESULT:\n{}\n\nProceed based on this result. If the tool usage was rejected, the user cancelled the operation.",
        payload
    )
}

pub fn greeting_context(time: &TimeContext) -> String {
    format!(
        "[HIDDEN CONTEXT]\n\
         [System Info: User reconnected. Current Time is {} ({}).]\n\
         [/HIDDEN CONTEXT]\n\
         \n\
         INSTRUCTION:\n\
         Based on the restored conversation history and the current time above, greet the user naturally.\n\
         If the last conversation was recent, act as if continuing.\n\
         If it was long ago, welcome them back.\n\
         IMPORTANT: Do NOT output the [System Info] or [HIDDEN CONTEXT] block. Just speak naturally.",
        time.stamp, time.period
    )
}

pub fn summary_prompt(request: &SummarizeRequest) -> String {
    let conversation_text: String = request
        .messages
        .iter()
        .map(|turn| format!("{}: {}\n", turn.role, turn.content))
        .collect();

    format!(
        "You are an expert summarizer.\n\
         Previous Summary:\n\
         {}\n\
         \n\
         Recent Conversation:\n\
         {}\n\
         Task:\n\
         Summarize the recent conversation, merging it with the previous summary to create a concise, updated summary of the entire context.\n\
         Focus on key decisions, user preferences, and important events.\n\
         Keep it under 5 sentences. Write the summary in the same language as the conversation.",
        request.previous_summary, conversation_text
    )
}

pub struct Session<B> {
    backend: B,
    config: SessionConfig,
    history: History,
    clock: Clock,
}

impl<B: ChatBackend> Session<B> {
    pub fn new(backend: B, config: SessionConfig) -> Self {
        let history = History::new(&config.system_prompt);
        Self {
            backend,
            config,
            history,
            clock: local_now,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Announce readiness, then serve commands until `EXIT` or end of input.
    pub async fn run<R, W>(&mut self, mut input: R, out: &mut LineWriter<W>) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        out.emit(&Outbound::Ready)?;

        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = match input.read_until(b'\n', &mut buf).await {
                Ok(read) => read,
                Err(e) => {
                    tracing::error!(error = %e, "failed to read from host");
                    break;
                }
            };
            if read == 0 {
                tracing::debug!("end of input");
                break;
            }

            let line = String::from_utf8_lossy(&buf);
            let command = command::parse(&line);

            match self.handle(command, out).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Exit) => {
                    tracing::debug!("exit requested");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "command failed");
                    let _ = out.emit(&Outbound::CriticalError(e.to_string()));
                    let _ = out.emit(&Outbound::Done);
                }
            }
        }

        Ok(())
    }

    pub async fn handle<W: Write>(
        &mut self,
        command: Command,
        out: &mut LineWriter<W>,
    ) -> Result<Flow> {
        tracing::debug!(
            kind = command.kind(),
            history_len = self.history.len(),
            "handling command"
        );

        match command {
            Command::Exit => return Ok(Flow::Exit),
            Command::PlainMessage(text) => self.handle_plain(&text, out).await?,
            Command::ToolResult(payload) => self.handle_tool_result(&payload, out).await?,
            Command::RestoreAndGreet(turns) => self.handle_restore(turns, out).await?,
            Command::Summarize(request) => self.handle_summarize(request, out).await?,
        }

        Ok(Flow::Continue)
    }

    async fn handle_plain<W: Write>(&mut self, text: &str, out: &mut LineWriter<W>) -> Result<()> {
        let time = TimeContext::at((self.clock)());
        self.history.push_user(timed_user_message(&time, text));
        self.generate_turn(out).await
    }

    async fn handle_tool_result<W: Write>(
        &mut self,
        payload: &str,
        out: &mut LineWriter<W>,
    ) -> Result<()> {
        self.history.push_user(tool_result_message(payload));
        self.generate_turn(out).await
    }

    async fn handle_restore<W: Write>(
        &mut self,
        turns: std::result::Result<Vec<ChatMessage>, PayloadError>,
        out: &mut LineWriter<W>,
    ) -> Result<()> {
        let turns = match turns {
            Ok(turns) => turns,
            Err(e) => {
                tracing::warn!(error = %e, "rejected restore payload");
                out.emit(&Outbound::Token(format!("Error restoring history: {}", e)))?;
                out.emit(&Outbound::Done)?;
                return Ok(());
            }
        };

        let restored = turns.len();
        self.history.restore(turns);

        let time = TimeContext::at((self.clock)());
        let messages = self
            .history
            .with_hidden(ChatMessage::system(greeting_context(&time)));
        let request = ChatRequest::new(&self.config.model_id, messages);

        let greeting = driver::stream_chat(&self.backend, out, &request).await?;
        self.history.push_assistant(greeting);
        tracing::info!(restored, history_len = self.history.len(), "history restored");
        Ok(())
    }

    async fn handle_summarize<W: Write>(
        &mut self,
        request: std::result::Result<SummarizeRequest, PayloadError>,
        out: &mut LineWriter<W>,
    ) -> Result<()> {
        let request = match request {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "rejected summarize payload");
                out.emit(&Outbound::Summary(format!("Error summarizing: {}", e)))?;
                return Ok(());
            }
        };

        let chat_request = ChatRequest::new(
            &self.config.summary_model,
            vec![ChatMessage::user(summary_prompt(&request))],
        );

        let line = match self.backend.complete(&chat_request).await {
            Ok(summary) => Outbound::Summary(summary),
            Err(e) => {
                tracing::warn!(model = %chat_request.model, error = %e, "summarization failed");
                Outbound::Summary(format!("Error summarizing: {}", e))
            }
        };
        out.emit(&line)?;
        Ok(())
    }

    /// Stream a reply to the current history and store it as the assistant turn.
    async fn generate_turn<W: Write>(&mut self, out: &mut LineWriter<W>) -> Result<()> {
        let request = ChatRequest::new(&self.config.model_id, self.history.messages().to_vec());
        let reply = driver::stream_chat(&self.backend, out, &request).await?;

        if let Some(tool) = tool_request::extract(&reply) {
            tracing::info!(tool = %tool.tool, "assistant requested a tool");
        }

        self.history.push_assistant(reply);
        tracing::info!(history_len = self.history.len(), "turn complete");
        Ok(())
    }
}
