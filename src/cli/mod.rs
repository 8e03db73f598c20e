//! Line-oriented CLI text protocol (C5): a Unix-domain socket transport
//! independent of AESP, used to remotely drive a running emulator
//! process from a shell or a thin wrapper (e.g. an MCP bridge, out of
//! scope here).
//!
//! Grammar summary (spec.md §4.5):
//! - Requests: `CMD:<verb> <args...>\n`
//! - Responses: `OK:<body>\n` or `ERR:<message>\n`
//! - Multi-line payloads use `\x1E` (Record Separator) between lines.
//! - Unsolicited: `EVENT:<name> <body>\n`

pub mod command;
pub mod framer;
pub mod message;
pub mod server;
pub mod socket;

pub use command::{BasicCommand, CliParseError, Command, DiskDensity, DosCommand, RegisterAssignment};
pub use framer::{cli_line_codec, MAX_LINE_BYTES};
pub use message::{Inbound, RECORD_SEPARATOR};
pub use server::{CliClientId, CliDelegate, CliOutcome, CliServer};
pub use socket::{discover_socket, socket_path_for_pid, SocketDiscoveryError};
