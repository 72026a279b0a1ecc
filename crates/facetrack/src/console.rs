//! Line-oriented control console for the live session.

use crate::engine::EngineHandle;
use crate::studio::{Studio, StudioError};
use facetrack_core::overlay;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tokio::io::{AsyncBufRead, Lines};
use tokio::time::Interval;

pub const HELP: &str = "\
commands:
  landmarks [on|off]    show landmark points (no argument toggles)
  expressions [on|off]  show expression bars (no argument toggles)
  record                start recording the view
  stop                  stop recording and preview the result
  download [PATH]       write the preview to PATH or the default name
  save                  keep the preview for the next start
  clear                 forget the kept recording and reload
  play                  open the preview in the system player
  snapshot PATH         save the current view as an image
  status                show toggles, recording, and preview
  help                  show this text
  quit                  exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Landmarks(Option<bool>),
    Expressions(Option<bool>),
    Record,
    Stop,
    Download(Option<PathBuf>),
    Save,
    Clear,
    Play,
    Snapshot(PathBuf),
    Status,
    Help,
    Quit,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}'; try 'help'")]
    Unknown(String),
    #[error("'{command}' expects on or off, got '{got}'")]
    BadSwitch { command: &'static str, got: String },
    #[error("'{0}' needs a path")]
    MissingPath(&'static str),
    #[error("too many arguments for '{0}'")]
    TooManyArguments(&'static str),
}

impl FromStr for ConsoleCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(ParseCommandError::Empty)?;
        let arg = words.next();

        let (command, takes_arg): (_, bool) = match name.to_ascii_lowercase().as_str() {
            "landmarks" => (ConsoleCommand::Landmarks(parse_switch("landmarks", arg)?), true),
            "expressions" => (ConsoleCommand::Expressions(parse_switch("expressions", arg)?), true),
            "record" => (ConsoleCommand::Record, false),
            "stop" => (ConsoleCommand::Stop, false),
            "download" => (ConsoleCommand::Download(arg.map(PathBuf::from)), true),
            "save" => (ConsoleCommand::Save, false),
            "clear" => (ConsoleCommand::Clear, false),
            "play" => (ConsoleCommand::Play, false),
            "snapshot" => {
                let path = arg.ok_or(ParseCommandError::MissingPath("snapshot"))?;
                (ConsoleCommand::Snapshot(PathBuf::from(path)), true)
            }
            "status" => (ConsoleCommand::Status, false),
            "help" | "?" => (ConsoleCommand::Help, false),
            "quit" | "exit" => (ConsoleCommand::Quit, false),
            other => return Err(ParseCommandError::Unknown(other.to_string())),
        };

        let extra = if takes_arg { words.next() } else { arg };
        if extra.is_some() {
            return Err(ParseCommandError::TooManyArguments(command.name()));
        }
        Ok(command)
    }
}

impl ConsoleCommand {
    fn name(&self) -> &'static str {
        match self {
            ConsoleCommand::Landmarks(_) => "landmarks",
            ConsoleCommand::Expressions(_) => "expressions",
            ConsoleCommand::Record => "record",
            ConsoleCommand::Stop => "stop",
            ConsoleCommand::Download(_) => "download",
            ConsoleCommand::Save => "save",
            ConsoleCommand::Clear => "clear",
            ConsoleCommand::Play => "play",
            ConsoleCommand::Snapshot(_) => "snapshot",
            ConsoleCommand::Status => "status",
            ConsoleCommand::Help => "help",
            ConsoleCommand::Quit => "quit",
        }
    }
}

fn parse_switch(command: &'static str, arg: Option<&str>) -> Result<Option<bool>, ParseCommandError> {
    match arg {
        None => Ok(None),
        Some("on") => Ok(Some(true)),
        Some("off") => Ok(Some(false)),
        Some(other) => Err(ParseCommandError::BadSwitch {
            command,
            got: other.to_string(),
        }),
    }
}

/// Outcome of one console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Message(String),
    Quit,
}

/// Run `command` against the studio and describe the result.
pub fn execute(
    studio: &mut Studio,
    engine: Option<&EngineHandle>,
    command: ConsoleCommand,
) -> Result<Reply, StudioError> {
    let message = match command {
        ConsoleCommand::Landmarks(on) => {
            format!("landmarks {}", on_off(studio.set_landmarks(on)))
        }
        ConsoleCommand::Expressions(on) => {
            format!("expressions {}", on_off(studio.set_expressions(on)))
        }
        ConsoleCommand::Record => {
            studio.start_recording()?;
            "recording; 'stop' to finish".to_string()
        }
        ConsoleCommand::Stop => {
            let asset = studio.stop_recording()?;
            if asset.is_empty() {
                return Ok(Reply::Message(format!("preview {} is empty; no frames were captured", asset.reference)));
            }
            format!(
                "preview {} ({} frames, {} bytes)",
                asset.reference,
                asset.frame_count.unwrap_or(0),
                asset.len()
            )
        }
        ConsoleCommand::Download(path) => {
            let path = studio.download(path.as_deref())?;
            format!("wrote {}", path.display())
        }
        ConsoleCommand::Save => {
            let saved_at = studio.save()?;
            format!("saved at {}", saved_at.to_rfc3339())
        }
        ConsoleCommand::Clear => {
            let removed = studio.clear()?;
            if removed {
                "saved recording removed; state reloaded".to_string()
            } else {
                "nothing saved; state reloaded".to_string()
            }
        }
        ConsoleCommand::Play => {
            let path = studio.play()?;
            format!("playing {}", path.display())
        }
        ConsoleCommand::Snapshot(path) => {
            studio.snapshot(&path)?;
            format!("wrote {}", path.display())
        }
        ConsoleCommand::Status => status_report(studio, engine),
        ConsoleCommand::Help => HELP.to_string(),
        ConsoleCommand::Quit => return Ok(Reply::Quit),
    };
    Ok(Reply::Message(message))
}

fn status_report(studio: &Studio, engine: Option<&EngineHandle>) -> String {
    let mut report = serde_json::to_value(studio.status()).unwrap_or_default();
    if let (Some(engine), Some(fields)) = (engine, report.as_object_mut()) {
        let latest = engine.latest();
        fields.insert("faces".into(), latest.faces.len().into());
        fields.insert("detected_frame".into(), latest.sequence.into());
        let moods: Vec<String> = latest
            .faces
            .iter()
            .filter_map(|f| f.expressions.as_ref())
            .map(|e| {
                let (expression, p) = e.dominant();
                overlay::expression_label(expression, p)
            })
            .collect();
        if !moods.is_empty() {
            fields.insert("expressions".into(), moods.into());
        }
    }
    serde_json::to_string_pretty(&report).unwrap_or_else(|e| format!("status unavailable: {e}"))
}

/// What woke the console up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleEvent {
    Line(String),
    /// Input reached end of file.
    Closed,
    Interrupted,
    /// The frame loop ended on its own, usually because capture failed.
    FrameLoopStopped,
}

/// Wait for the next console line, Ctrl-C, or the frame loop ending.
///
/// `frame_loop_stopped` is polled on every `watchdog` tick, so a dead
/// camera is noticed even while nobody types.
pub async fn next_event<R>(
    lines: &mut Lines<R>,
    watchdog: &mut Interval,
    frame_loop_stopped: impl Fn() -> bool,
) -> std::io::Result<ConsoleEvent>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        tokio::select! {
            line = lines.next_line() => {
                return Ok(match line? {
                    Some(line) => ConsoleEvent::Line(line),
                    None => ConsoleEvent::Closed,
                });
            }
            _ = watchdog.tick() => {
                if frame_loop_stopped() {
                    return Ok(ConsoleEvent::FrameLoopStopped);
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(ConsoleEvent::Interrupted),
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}
