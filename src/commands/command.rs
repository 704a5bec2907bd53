//! Command Validation
//!
//! Turns a decoded [`Frame`] into a typed [`Command`], checking arity and
//! option syntax. Nothing here touches the store or the snapshot; the
//! [`CommandHandler`](super::CommandHandler) executes what this module accepts.

use crate::protocol::Frame;
use crate::storage::current_time_ms;
use bytes::Bytes;
use thiserror::Error;

/// A validated client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `PING`
    Ping,
    /// `ECHO <msg> [msg ...]`
    Echo(Vec<Bytes>),
    /// `SET <key> <value> [PX <ms>]`, expiry already resolved to epoch ms
    Set {
        key: Bytes,
        value: Bytes,
        expires_at_ms: Option<i64>,
    },
    /// `GET <key>`
    Get(Bytes),
    /// `CONFIG GET <parameter>`
    ConfigGet(Bytes),
    /// `KEYS *`
    Keys,
}

/// Reasons a frame is rejected before execution.
///
/// The `Display` text is the error reply sent to the client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("ERR invalid expire time in 'set' command")]
    InvalidExpire,

    #[error("ERR unknown subcommand '{0}'. Try CONFIG GET.")]
    UnknownSubcommand(String),

    #[error("ERR unsupported KEYS pattern '{0}', only '*' is supported")]
    UnsupportedPattern(String),
}

impl Command {
    /// Validates a frame, resolving a relative `PX` expiry against the clock.
    pub fn from_frame(frame: Frame) -> Result<Self, CommandError> {
        Self::from_frame_at(frame, current_time_ms())
    }

    /// Validates a frame with an explicit "now" in epoch milliseconds.
    pub fn from_frame_at(frame: Frame, now_ms: i64) -> Result<Self, CommandError> {
        let name = frame.command_name();
        let (_, args) = frame.into_parts();

        match name.as_str() {
            "PING" => {
                expect_arity(&name, &args, 0, 0)?;
                Ok(Command::Ping)
            }
            "ECHO" => {
                expect_arity(&name, &args, 1, usize::MAX)?;
                Ok(Command::Echo(args))
            }
            "SET" => parse_set(&name, args, now_ms),
            "GET" => {
                expect_arity(&name, &args, 1, 1)?;
                let mut args = args.into_iter();
                Ok(Command::Get(args.next().unwrap_or_default()))
            }
            "CONFIG" => parse_config(&name, args),
            "KEYS" => {
                expect_arity(&name, &args, 1, 1)?;
                if &args[0][..] == b"*" {
                    Ok(Command::Keys)
                } else {
                    Err(CommandError::UnsupportedPattern(printable(&args[0])))
                }
            }
            _ => Err(CommandError::UnknownCommand(printable(name.as_bytes()))),
        }
    }

    /// Upper-case command name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "PING",
            Command::Echo(_) => "ECHO",
            Command::Set { .. } => "SET",
            Command::Get(_) => "GET",
            Command::ConfigGet(_) => "CONFIG",
            Command::Keys => "KEYS",
        }
    }
}

fn expect_arity(name: &str, args: &[Bytes], min: usize, max: usize) -> Result<(), CommandError> {
    if args.len() < min || args.len() > max {
        return Err(CommandError::WrongArity(name.to_string()));
    }
    Ok(())
}

/// SET key value [PX ms]; unrecognised option tokens are skipped.
fn parse_set(name: &str, args: Vec<Bytes>, now_ms: i64) -> Result<Command, CommandError> {
    expect_arity(name, &args, 2, usize::MAX)?;

    let mut args = args.into_iter();
    let key = args.next().unwrap_or_default();
    let value = args.next().unwrap_or_default();
    let mut expires_at_ms = None;

    while let Some(option) = args.next() {
        if !option.eq_ignore_ascii_case(b"PX") {
            continue;
        }
        let raw = args.next().ok_or(CommandError::Syntax)?;
        let ms = parse_integer(&raw).ok_or(CommandError::NotInteger)?;
        if ms <= 0 {
            return Err(CommandError::InvalidExpire);
        }
        let deadline = now_ms.checked_add(ms).ok_or(CommandError::InvalidExpire)?;
        expires_at_ms = Some(deadline);
    }

    Ok(Command::Set {
        key,
        value,
        expires_at_ms,
    })
}

fn parse_config(name: &str, args: Vec<Bytes>) -> Result<Command, CommandError> {
    let Some(subcommand) = args.first() else {
        return Err(CommandError::WrongArity(name.to_string()));
    };

    if !subcommand.eq_ignore_ascii_case(b"GET") {
        return Err(CommandError::UnknownSubcommand(printable(subcommand)));
    }
    if args.len() != 2 {
        return Err(CommandError::WrongArity("CONFIG|GET".to_string()));
    }

    Ok(Command::ConfigGet(args[1].clone()))
}

/// Client bytes made safe for a status line: control characters become spaces.
pub(crate) fn printable(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

fn parse_integer(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse().ok()
}
