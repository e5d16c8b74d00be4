//! Inbound and outbound queues between transport and engine
//!
//! Both queues are unbounded and FIFO, so lines reach the engine in wire
//! order and commands reach the wire in emission order. Only well-formed
//! lines and commands travel through them, never errors.

use std::fmt;

use tokio::sync::mpsc;

use crate::types::StationId;

/// Outbound command for the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Acknowledge a confirmed tag: `OK_Lader<station>!`
    Accept(StationId),
    /// One line of a structured frame response
    Frame(String),
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Accept(station) => write!(f, "OK_Lader{}!", station),
            Command::Frame(line) => f.write_str(line),
        }
    }
}

/// Transport side: pushes received lines, pops commands to write
#[derive(Debug)]
pub struct TransportEnds {
    pub lines: mpsc::UnboundedSender<String>,
    pub commands: mpsc::UnboundedReceiver<Command>,
}

/// Engine side: pops received lines, pushes commands
#[derive(Debug)]
pub struct EngineEnds {
    pub lines: mpsc::UnboundedReceiver<String>,
    pub commands: mpsc::UnboundedSender<Command>,
}

/// Create the two queues and split them into transport and engine ends
pub fn link_channels() -> (TransportEnds, EngineEnds) {
    let (line_tx, line_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    (
        TransportEnds {
            lines: line_tx,
            commands: command_rx,
        },
        EngineEnds {
            lines: line_rx,
            commands: command_tx,
        },
    )
}
