//! Interactive chat in the terminal.
//!
//! Drives the same [`SessionOrchestrator`] as the WebSocket bridge. Permission
//! prompts are answered on the same input stream as chat messages.

use std::future::Future;
use std::io::Write;

use donna_protocol::{AgentEvent, SessionStats};
use futures::StreamExt;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tracing::debug;

use crate::permission::{PermissionDecision, PermissionRequest};
use crate::session::{SessionError, SessionEvent, SessionOrchestrator, prompt};

const EXIT_WORDS: &[&str] = &["exit", "quit", "q"];

const DIM: &str = "\x1b[2m";
const BOLD_BLUE: &str = "\x1b[1;34m";
const BOLD_GREEN: &str = "\x1b[1;32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// Tool output longer than this many lines is cut when shown.
const MAX_TOOL_RESULT_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("terminal I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct TerminalOptions {
    pub timezone: Option<String>,
    /// Print thinking and tool traffic.
    pub show_thinking: bool,
    pub color: bool,
}

pub struct TerminalChat<R, W> {
    input: Lines<R>,
    output: W,
    options: TerminalOptions,
}

enum Outcome {
    Finished(Result<(), TerminalError>),
    Interrupted,
}

impl<R, W> TerminalChat<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(input: R, output: W, options: TerminalOptions) -> Self {
        Self {
            input: input.lines(),
            output,
            options,
        }
    }

    /// Run until the user leaves or `interrupt` fires. The session is always exited.
    pub async fn run(
        mut self,
        session: &mut SessionOrchestrator,
        interrupt: impl Future<Output = ()>,
    ) -> Result<(), TerminalError> {
        let outcome = tokio::select! {
            result = self.converse(session) => Outcome::Finished(result),
            _ = interrupt => Outcome::Interrupted,
        };

        let result = match outcome {
            Outcome::Finished(result) => result,
            Outcome::Interrupted => {
                let line = self.paint(YELLOW, "Chat interrupted");
                writeln!(self.output, "\n{line}").map_err(TerminalError::from)
            }
        };
        session.exit().await;
        result
    }

    async fn converse(&mut self, session: &mut SessionOrchestrator) -> Result<(), TerminalError> {
        let banner = self.paint(BOLD_BLUE, "Donna");
        writeln!(self.output, "{banner} - your life operating system")?;
        writeln!(self.output, "Type 'exit', 'quit' or 'q' to end.")?;

        session.enter(self.options.timezone.as_deref()).await?;
        if session.greeting_sent() {
            self.render_turn(session, false).await?;
        }

        loop {
            let label = self.paint(BOLD_GREEN, "You:");
            write!(self.output, "\n{label} ")?;
            self.output.flush()?;

            let Some(line) = self.input.next_line().await? else {
                writeln!(self.output)?;
                return self.farewell(session).await;
            };
            let line = line.trim();
            if line.is_empty() || EXIT_WORDS.contains(&line.to_lowercase().as_str()) {
                return self.farewell(session).await;
            }

            session.send(line).await?;
            self.render_turn(session, false).await?;
        }
    }

    async fn farewell(&mut self, session: &mut SessionOrchestrator) -> Result<(), TerminalError> {
        let note = self.paint(DIM, "Updating context...");
        writeln!(self.output, "{note}")?;

        let instruction = prompt::context_update_prompt(&session.config().profile);
        session.send(&instruction).await?;
        self.render_turn(session, true).await?;

        let bye = self.paint(YELLOW, "Goodbye!");
        writeln!(self.output, "{bye}")?;
        Ok(())
    }

    /// Print one turn. `quiet` hides everything except permission prompts.
    async fn render_turn(
        &mut self,
        session: &mut SessionOrchestrator,
        quiet: bool,
    ) -> Result<(), TerminalError> {
        let broker = session.broker();
        let mut turn = session.stream_response()?;
        let mut started_text = false;

        while let Some(item) = turn.next().await {
            match item? {
                SessionEvent::PermissionRequested(request) => {
                    let decision = self.ask_permission(&request).await?;
                    broker.resolve(decision);
                }
                SessionEvent::Agent(_) if quiet => {}
                SessionEvent::Agent(event) => self.render_event(event, &mut started_text)?,
            }
        }

        if started_text {
            writeln!(self.output)?;
        }
        self.output.flush()?;
        Ok(())
    }

    fn render_event(
        &mut self,
        event: AgentEvent,
        started_text: &mut bool,
    ) -> Result<(), TerminalError> {
        if event.is_placeholder_text() {
            return Ok(());
        }
        match event {
            AgentEvent::Text { content } => {
                if !*started_text {
                    let label = self.paint(BOLD_BLUE, "Donna:");
                    write!(self.output, "\n{label} ")?;
                    *started_text = true;
                }
                write!(self.output, "{content}")?;
                self.output.flush()?;
            }
            AgentEvent::Thinking { content } if self.options.show_thinking => {
                let text = self.paint(DIM, &format!("[thinking] {content}"));
                writeln!(self.output, "\n{text}")?;
            }
            AgentEvent::ToolUse { name, input, .. } if self.options.show_thinking => {
                let input = serde_json::to_string_pretty(&input).unwrap_or_default();
                let text = self.paint(DIM, &format!("[tool: {name}]\n{input}"));
                writeln!(self.output, "\n{text}")?;
            }
            AgentEvent::ToolResult {
                content, is_error, ..
            } if self.options.show_thinking => {
                let (label, style) = if is_error {
                    ("[tool error]", RED)
                } else {
                    ("[tool result]", DIM)
                };
                let body = truncate_lines(&content.flatten(), MAX_TOOL_RESULT_LINES);
                let text = self.paint(style, &format!("{label}\n{body}"));
                writeln!(self.output, "\n{text}")?;
            }
            AgentEvent::SessionStats(stats) => {
                let line = self.paint(DIM, &stats_line(&stats));
                writeln!(self.output, "\n{line}")?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn ask_permission(
        &mut self,
        request: &PermissionRequest,
    ) -> Result<PermissionDecision, TerminalError> {
        let what = match request.command() {
            Some(command) => command.to_string(),
            None => format!("{} {}", request.tool_name, request.tool_input),
        };
        let label = self.paint(YELLOW, "Donna wants to run:");
        writeln!(self.output, "\n{label} {what}")?;
        let question = self.paint(YELLOW, "Allow this command? [y/N]");
        write!(self.output, "{question} ")?;
        self.output.flush()?;

        let answer = self.input.next_line().await?.unwrap_or_default();
        let allowed = matches!(answer.trim().to_lowercase().as_str(), "y" | "yes");
        debug!(tool = %request.tool_name, allowed, "Terminal permission answer");
        Ok(PermissionDecision::from_allowed(allowed))
    }

    fn paint(&self, style: &str, text: &str) -> String {
        if self.options.color {
            format!("{style}{text}{RESET}")
        } else {
            text.to_string()
        }
    }
}

/// `─── Turns: 2 │ Duration: 1500ms │ Cost: $0.0123 ───`
pub fn stats_line(stats: &SessionStats) -> String {
    let mut parts = Vec::new();
    if stats.turns > 0 {
        parts.push(format!("Turns: {}", stats.turns));
    }
    if stats.duration_ms > 0 {
        parts.push(format!("Duration: {}ms", stats.duration_ms));
    }
    if let Some(cost) = stats.cost_usd {
        parts.push(format!("Cost: ${cost:.4}"));
    }
    format!("─── {} ───", parts.join(" │ "))
}

fn truncate_lines(text: &str, max: usize) -> String {
    let total = text.lines().count();
    if total <= max {
        return text.to_string();
    }
    let mut kept: Vec<&str> = text.lines().take(max).collect();
    let more = format!("... ({} more lines)", total - max);
    kept.push(&more);
    kept.join("\n")
}
