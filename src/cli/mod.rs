//! CLI entry point for agentrun.

use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::error::{AgentRunError, Result};
use crate::permissions;
use crate::protocol::{decode_line, DecodedToolCall, DecoderObserver, RunDecoder, RunEnd};
use crate::types::Agent;

/// agentrun CLI
#[derive(Parser, Debug)]
#[command(name = "agentrun", version, about = "Inspect agent runs and permissions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Decode a JSONL event stream and print the transcript and outcome
    Decode(DecodeArgs),
    /// Print an agent's effective tool permissions
    Permissions(PermissionsArgs),
}

#[derive(Parser, Debug)]
pub struct DecodeArgs {
    /// Event file, or `-` for stdin
    pub input: String,
}

#[derive(Parser, Debug)]
pub struct PermissionsArgs {
    /// Agent definition (JSON)
    pub agent: PathBuf,

    /// Caller's user group (repeatable)
    #[arg(long = "group")]
    pub groups: Vec<Uuid>,
}

/// Echoes the run as it decodes. The first write failure is kept and
/// further output is suppressed.
struct PrintingObserver<W: Write + Send> {
    out: W,
    error: Option<std::io::Error>,
}

impl<W: Write + Send> PrintingObserver<W> {
    fn new(out: W) -> Self {
        Self { out, error: None }
    }

    fn emit(&mut self, write: impl FnOnce(&mut W) -> std::io::Result<()>) {
        if self.error.is_none() {
            if let Err(e) = write(&mut self.out) {
                self.error = Some(e);
            }
        }
    }
}

impl<W: Write + Send> DecoderObserver for PrintingObserver<W> {
    fn on_text_delta(&mut self, _message_id: &str, delta: &str) {
        self.emit(|out| write!(out, "{delta}"));
    }

    fn on_text_end(&mut self, _message_id: &str) {
        self.emit(|out| writeln!(out));
    }

    fn on_tool_call_end(&mut self, call: &DecodedToolCall) {
        self.emit(|out| writeln!(out, "-> {}({}) [{}]", call.name, call.arguments, call.id));
    }

    fn on_tool_call_result(&mut self, call: &DecodedToolCall) {
        self.emit(|out| {
            writeln!(
                out,
                "<- {} [{}]",
                call.result.as_deref().unwrap_or_default(),
                call.id
            )
        });
    }

    fn on_run_error(&mut self, message: &str, code: Option<&str>) {
        self.emit(|out| writeln!(out, "!! {} {message}", code.unwrap_or("ERROR")));
    }

    fn on_custom_event(&mut self, name: &str, value: &serde_json::Value) {
        self.emit(|out| writeln!(out, "** {name} {value}"));
    }
}

fn open_input(input: &str) -> Result<Box<dyn Read>> {
    if input == "-" {
        return Ok(Box::new(std::io::stdin()));
    }
    let file = std::fs::File::open(input)?;
    Ok(Box::new(file))
}

/// Decode `reader` line by line, echoing to `out`. Undecodable lines are
/// reported and skipped. Returns the outcome, if the stream reached one.
pub fn decode_events<R: Read, W: Write + Send>(reader: R, out: W) -> Result<Option<RunEnd>> {
    let mut decoder = RunDecoder::with_observer(PrintingObserver::new(out));
    for (number, line) in BufReader::new(reader).lines().enumerate() {
        match decode_line(&line?) {
            Ok(Some(event)) => decoder.apply(event),
            Ok(None) => {}
            Err(err) => tracing::warn!(line = number + 1, error = %err, "skipping line"),
        }
        if let Some(err) = decoder.observer_mut().error.take() {
            return Err(err.into());
        }
    }

    let end = decoder.end().cloned();
    let pending: Vec<String> = decoder
        .pending_tool_calls()
        .iter()
        .map(|c| format!("{} [{}]", c.name, c.id))
        .collect();
    let status = decoder.status();
    let mut out = decoder.into_observer().out;
    writeln!(out, "status: {status}")?;
    match &end {
        Some(RunEnd::Success) => writeln!(out, "outcome: success")?,
        Some(RunEnd::Error { message }) => writeln!(out, "outcome: error: {message}")?,
        Some(RunEnd::Interrupt(interrupt)) => {
            writeln!(
                out,
                "outcome: interrupt {} ({}): {}",
                interrupt.id,
                interrupt.reason.as_deref().unwrap_or("no reason"),
                interrupt.title
            )?;
            for call in pending {
                writeln!(out, "awaiting: {call}")?;
            }
        }
        None => writeln!(out, "outcome: none (stream ended before RUN_FINISHED)")?,
    }
    Ok(end)
}

pub fn handle_decode(args: &DecodeArgs) -> Result<()> {
    let reader = open_input(&args.input)?;
    decode_events(reader, std::io::stdout())?;
    Ok(())
}

pub fn load_agent(path: &Path) -> Result<Agent> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AgentRunError::Configuration(format!("could not read agent `{}`: {e}", path.display()))
    })?;
    Ok(serde_json::from_str(&raw)?)
}

pub fn handle_permissions(args: &PermissionsArgs) -> Result<()> {
    let agent = load_agent(&args.agent)?;
    let effective = permissions::effective_for_agent(&agent, &args.groups);
    println!("{}", serde_json::to_string_pretty(&effective)?);
    Ok(())
}
