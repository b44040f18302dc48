//! Filesystem-trace state machine
//!
//! The tracer emits a line-oriented event log: `r|<path>`, `w|<path>`,
//! `d|<path>`, or `m|<dst>|<src>` for moves. Folding the stream reduces
//! each path to a terminal state that classifies it as an input, an
//! output, both, or a transient file that does not survive the action.
//!
//! The fold is pure: its only output is the per-path map, and every
//! impossible transition (delete before write, read then delete, delete
//! then read, double delete) is a defined fatal error rather than a
//! silent reclassification.

use crate::error::TraceViolation;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// One event from the tracer's log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// The program read `path`
    Read(String),
    /// The program wrote `path`
    Write(String),
    /// The program deleted `path`
    Delete(String),
    /// The program moved `src` to `dst`
    Move {
        /// Destination path
        dst: String,
        /// Source path
        src: String,
    },
}

/// Terminal state of one path after folding its events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Only read: an input
    Read,
    /// Only written: an output
    Written,
    /// Read then written: both input and output
    ReadWritten,
    /// Written then deleted: transient, reported as neither
    Deleted,
}

/// Parse one line of the tracer's event log
///
/// Empty lines yield `None`. Unknown event kinds and truncated move
/// events are fatal (`TracerFailure`).
pub fn parse_trace_line(line: &str) -> Result<Option<TraceEvent>> {
    if line.is_empty() {
        return Ok(None);
    }
    let (kind, rest) = line
        .split_once('|')
        .ok_or_else(|| Error::tracer(format!("malformed trace event: {line}")))?;
    let event = match kind {
        "r" => TraceEvent::Read(rest.to_string()),
        "w" => TraceEvent::Write(rest.to_string()),
        "d" => TraceEvent::Delete(rest.to_string()),
        "m" => {
            let (dst, src) = rest
                .split_once('|')
                .ok_or_else(|| Error::tracer(format!("malformed move event: {line}")))?;
            TraceEvent::Move {
                dst: dst.to_string(),
                src: src.to_string(),
            }
        }
        other => {
            return Err(Error::tracer(format!("unknown trace event kind: {other}")));
        }
    };
    Ok(Some(event))
}

/// Parse a whole trace log into events
pub fn parse_trace(text: &str) -> Result<Vec<TraceEvent>> {
    let mut events = Vec::new();
    for line in text.lines() {
        if let Some(event) = parse_trace_line(line)? {
            events.push(event);
        }
    }
    Ok(events)
}

/// The three primitive event kinds a path can receive after move rewriting
#[derive(Debug, Clone, Copy)]
enum Primitive {
    Read,
    Write,
    Delete,
}

fn transition(state: Option<FileState>, event: Primitive, path: &str) -> Result<FileState> {
    let violation = |violation| Error::TraceState {
        violation,
        path: path.to_string(),
    };
    match (state, event) {
        (None, Primitive::Read) => Ok(FileState::Read),
        (None, Primitive::Write) => Ok(FileState::Written),
        (None, Primitive::Delete) => Err(violation(TraceViolation::DeleteBeforeWrite)),

        (Some(FileState::Read), Primitive::Read) => Ok(FileState::Read),
        (Some(FileState::Read), Primitive::Write) => Ok(FileState::ReadWritten),
        (Some(FileState::Read), Primitive::Delete) => {
            Err(violation(TraceViolation::ReadThenDelete))
        }

        (Some(FileState::Written), Primitive::Read | Primitive::Write) => Ok(FileState::Written),
        (Some(FileState::Written), Primitive::Delete) => Ok(FileState::Deleted),

        (Some(FileState::ReadWritten), _) => Ok(FileState::ReadWritten),

        (Some(FileState::Deleted), Primitive::Read) => {
            Err(violation(TraceViolation::DeleteThenRead))
        }
        (Some(FileState::Deleted), Primitive::Write) => Ok(FileState::Written),
        (Some(FileState::Deleted), Primitive::Delete) => {
            Err(violation(TraceViolation::DoubleDelete))
        }
    }
}

/// Fold an event stream into per-path terminal states
///
/// Moves are rewritten to a delete of the source followed by a write of
/// the destination before folding.
pub fn fold(events: impl IntoIterator<Item = TraceEvent>) -> Result<BTreeMap<String, FileState>> {
    let mut states: BTreeMap<String, FileState> = BTreeMap::new();
    let mut apply = |path: String, primitive: Primitive| -> Result<()> {
        let next = transition(states.get(&path).copied(), primitive, &path)?;
        states.insert(path, next);
        Ok(())
    };

    for event in events {
        match event {
            TraceEvent::Read(path) => apply(path, Primitive::Read)?,
            TraceEvent::Write(path) => apply(path, Primitive::Write)?,
            TraceEvent::Delete(path) => apply(path, Primitive::Delete)?,
            TraceEvent::Move { dst, src } => {
                apply(src, Primitive::Delete)?;
                apply(dst, Primitive::Write)?;
            }
        }
    }
    Ok(states)
}

/// The traced accesses classified into inputs and outputs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessSets {
    /// Paths the program read (terminal `r` or `rw`)
    pub inputs: std::collections::BTreeSet<String>,
    /// Paths the program produced (terminal `w` or `rw`)
    pub outputs: std::collections::BTreeSet<String>,
}

/// Derive input/output sets from terminal states
///
/// Transient files (written then deleted) appear in neither set.
#[must_use]
pub fn classify(states: &BTreeMap<String, FileState>) -> AccessSets {
    let mut sets = AccessSets::default();
    for (path, state) in states {
        match state {
            FileState::Read => {
                sets.inputs.insert(path.clone());
            }
            FileState::Written => {
                sets.outputs.insert(path.clone());
            }
            FileState::ReadWritten => {
                sets.inputs.insert(path.clone());
                sets.outputs.insert(path.clone());
            }
            FileState::Deleted => {}
        }
    }
    sets
}
