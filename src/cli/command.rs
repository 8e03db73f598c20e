//! CLI command grammar: parses a `CMD:`-stripped line into a typed
//! [`Command`], and encodes a `Command` back into wire form for a client.

use thiserror::Error;

/// Every error the CLI grammar parser can report. Named exactly per the
/// verb-level validation spec.md §4.5 calls for, so a caller can match
/// on *why* a line was rejected rather than just that it was.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CliParseError {
    #[error("unrecognized command: {0:?}")]
    InvalidCommand(String),

    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("invalid count: {0:?}")]
    InvalidCount(String),

    #[error("invalid byte: {0:?}")]
    InvalidByte(String),

    #[error("invalid step count: {0:?}")]
    InvalidStepCount(String),

    #[error("invalid reset type: {0:?}")]
    InvalidResetType(String),

    #[error("invalid register: {0:?}")]
    InvalidRegister(String),

    #[error("invalid register format: {0:?}")]
    InvalidRegisterFormat(String),

    #[error("invalid value: {0:?}")]
    InvalidValue(String),

    #[error("invalid drive number: {0:?}")]
    InvalidDriveNumber(String),

    #[error("missing argument for {command}: expected {expected}")]
    MissingArgument { command: String, expected: String },

    #[error("unexpected response: {0:?}")]
    UnexpectedResponse(String),
}

/// One register assignment from a `registers` write, e.g. `A=0x10`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterAssignment {
    pub register: String,
    pub value: u16,
}

/// Disk density accepted by `dos newdisk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskDensity {
    Single,
    Enhanced,
    Double,
}

/// The `basic …` verb family (spec.md §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BasicCommand {
    New,
    Run,
    List { atascii: bool },
    Del { target: String },
    Stop,
    Cont,
    Vars,
    Var { name: String },
    Info,
    Export { path: String },
    Import { path: String },
    Dir { drive: Option<String> },
    Renum { start: Option<u32>, step: Option<u32> },
    Save { target: String },
    Load { target: String },
    /// `<line-number> <text...>` passed through verbatim as a program edit.
    LineEdit { line: u32, text: String },
}

/// The `dos …` verb family (spec.md §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DosCommand {
    Cd { drive: String },
    Dir { pattern: Option<String> },
    Info { file: String },
    Type { file: String },
    Dump { file: String },
    Lock { file: String },
    Unlock { file: String },
    Delete { file: String },
    Copy { src: String, dst: String },
    Rename { src: String, dst: String },
    Export { file: String, hostpath: String },
    Import { hostpath: String, file: String },
    NewDisk { path: String, density: Option<DiskDensity> },
    Format,
}

/// Every CLI verb family, one variant per spec.md §4.5 command group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Version,
    Quit,
    Shutdown,
    Pause,
    Resume,
    Status,
    Drives,
    Screen { atascii: bool },
    Screenshot { path: Option<String> },
    Step { count: u32 },
    Reset { cold: bool },
    Read { addr: u16, count: u16 },
    Write { addr: u16, bytes: Vec<u8> },
    RegistersRead,
    RegistersWrite { assignments: Vec<RegisterAssignment> },
    BreakpointSet { addr: u16 },
    BreakpointClear { addr: u16 },
    BreakpointClearAll,
    BreakpointList,
    Disassemble { addr: Option<u16>, lines: Option<u16> },
    Assemble { addr: u16, instruction: Option<String> },
    AssembleInput { instruction: String },
    AssembleEnd,
    StepOver,
    Until { addr: u16 },
    Fill { start: u16, end: u16, byte: u8 },
    Mount { drive: u8, path: String },
    Unmount { drive: u8 },
    BootFile { path: String },
    StateSave { path: String },
    StateLoad { path: String },
    InjectBasic { base64: String },
    InjectKeys { text: String },
    Basic(BasicCommand),
    Dos(DosCommand),
}

fn require<'a>(parts: &mut std::slice::Iter<'a, &'a str>, command: &str, expected: &str) -> Result<&'a str, CliParseError> {
    parts.next().copied().ok_or_else(|| CliParseError::MissingArgument {
        command: command.to_string(),
        expected: expected.to_string(),
    })
}

/// Parses `$XXXX`, `0xXXXX`, or plain decimal, per spec.md §4.5's address
/// grammar for `read`/`write`/`breakpoint`/`disassemble`/etc.
fn parse_u16_flexible(s: &str) -> Option<u16> {
    if let Some(hex) = s.strip_prefix('$') {
        u16::from_str_radix(hex, 16).ok()
    } else if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn parse_addr(s: &str) -> Result<u16, CliParseError> {
    parse_u16_flexible(s).ok_or_else(|| CliParseError::InvalidAddress(s.to_string()))
}

fn parse_u8_flexible(s: &str) -> Option<u8> {
    if let Some(hex) = s.strip_prefix('$') {
        u8::from_str_radix(hex, 16).ok()
    } else if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u8::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

fn is_valid_register_name(name: &str) -> bool {
    matches!(name.to_uppercase().as_str(), "A" | "X" | "Y" | "S" | "P" | "PC")
}

/// `b1,b2,…`: comma-separated bytes, each hex with or without a `$`.
fn parse_byte_list(s: &str) -> Result<Vec<u8>, CliParseError> {
    s.split(',')
        .map(|tok| {
            let tok = tok.strip_prefix('$').unwrap_or(tok);
            u8::from_str_radix(tok, 16).map_err(|_| CliParseError::InvalidByte(tok.to_string()))
        })
        .collect()
}

fn encode_byte_list(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("${b:02X}")).collect::<Vec<_>>().join(",")
}

impl Command {
    /// Parse a CLI request line with the `CMD:` prefix already stripped,
    /// e.g. `"read 0x0600 16"`. Verbs are case-insensitive.
    pub fn parse(line: &str) -> Result<Self, CliParseError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let mut parts = tokens.iter();
        let verb_raw = parts.next().copied().unwrap_or("");
        let verb = verb_raw.to_ascii_lowercase();

        // A bare line beginning with a digit is a BASIC line edit, e.g.
        // `10 PRINT "HI"` — dispatched before the verb table.
        if verb.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            if let Ok(line_no) = verb.parse::<u32>() {
                let text = tokens[1..].join(" ");
                return Ok(Command::Basic(BasicCommand::LineEdit { line: line_no, text }));
            }
        }

        match verb.as_str() {
            "ping" => Ok(Command::Ping),
            "version" => Ok(Command::Version),
            "quit" => Ok(Command::Quit),
            "shutdown" => Ok(Command::Shutdown),
            "pause" => Ok(Command::Pause),
            "resume" => Ok(Command::Resume),
            "status" => Ok(Command::Status),
            "drives" => Ok(Command::Drives),
            "screen" => {
                let atascii = matches!(parts.next(), Some(&w) if w.eq_ignore_ascii_case("atascii"));
                Ok(Command::Screen { atascii })
            }
            "screenshot" => Ok(Command::Screenshot { path: parts.next().map(|s| s.to_string()) }),
            "step" => {
                let count = match parts.next() {
                    None => 1,
                    Some(n) => n
                        .parse::<u32>()
                        .ok()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| CliParseError::InvalidStepCount(n.to_string()))?,
                };
                Ok(Command::Step { count })
            }
            "reset" => match parts.next().map(|s| s.to_ascii_lowercase()) {
                None => Ok(Command::Reset { cold: true }),
                Some(ref s) if s == "cold" => Ok(Command::Reset { cold: true }),
                Some(ref s) if s == "warm" => Ok(Command::Reset { cold: false }),
                Some(other) => Err(CliParseError::InvalidResetType(other)),
            },
            "read" => {
                let addr_s = require(&mut parts, "read", "addr")?;
                let count_s = require(&mut parts, "read", "count")?;
                let addr = parse_addr(addr_s)?;
                let count =
                    parse_u16_flexible(count_s).ok_or_else(|| CliParseError::InvalidCount(count_s.to_string()))?;
                Ok(Command::Read { addr, count })
            }
            "write" => {
                let addr_s = require(&mut parts, "write", "addr")?;
                let bytes_s = require(&mut parts, "write", "bytes")?;
                let addr = parse_addr(addr_s)?;
                let bytes = parse_byte_list(bytes_s)?;
                Ok(Command::Write { addr, bytes })
            }
            "registers" => {
                let assignments: Vec<&&str> = parts.collect();
                if assignments.is_empty() {
                    return Ok(Command::RegistersRead);
                }
                let mut out = Vec::with_capacity(assignments.len());
                for assignment_s in assignments {
                    let (name, value_s) = assignment_s
                        .split_once('=')
                        .ok_or_else(|| CliParseError::InvalidRegisterFormat(assignment_s.to_string()))?;
                    if !is_valid_register_name(name) {
                        return Err(CliParseError::InvalidRegister(name.to_string()));
                    }
                    let value = parse_u16_flexible(value_s)
                        .ok_or_else(|| CliParseError::InvalidValue(value_s.to_string()))?;
                    out.push(RegisterAssignment { register: name.to_uppercase(), value });
                }
                Ok(Command::RegistersWrite { assignments: out })
            }
            "breakpoint" => {
                let sub = require(&mut parts, "breakpoint", "set|clear|clearall|list")?;
                match sub {
                    "set" => {
                        let addr_s = require(&mut parts, "breakpoint set", "addr")?;
                        Ok(Command::BreakpointSet { addr: parse_addr(addr_s)? })
                    }
                    "clear" => {
                        let addr_s = require(&mut parts, "breakpoint clear", "addr")?;
                        Ok(Command::BreakpointClear { addr: parse_addr(addr_s)? })
                    }
                    "clearall" => Ok(Command::BreakpointClearAll),
                    "list" => Ok(Command::BreakpointList),
                    other => Err(CliParseError::InvalidCommand(format!("breakpoint {other}"))),
                }
            }
            "disassemble" | "disasm" | "d" => {
                let addr = parts.next().map(|s| parse_addr(s)).transpose()?;
                let lines = parts
                    .next()
                    .map(|s| parse_u16_flexible(s).ok_or_else(|| CliParseError::InvalidCount(s.to_string())))
                    .transpose()?;
                Ok(Command::Disassemble { addr, lines })
            }
            "assemble" | "asm" | "a" => match parts.clone().next() {
                Some(&"input") => {
                    parts.next();
                    let instruction: Vec<&str> = parts.copied().collect();
                    Ok(Command::AssembleInput { instruction: instruction.join(" ") })
                }
                Some(&"end") => Ok(Command::AssembleEnd),
                _ => {
                    let addr_s = require(&mut parts, "assemble", "addr")?;
                    let addr = parse_addr(addr_s)?;
                    let rest: Vec<&str> = parts.copied().collect();
                    let instruction = if rest.is_empty() { None } else { Some(rest.join(" ")) };
                    Ok(Command::Assemble { addr, instruction })
                }
            },
            "stepover" | "so" => Ok(Command::StepOver),
            "until" | "rununtil" => {
                let addr_s = require(&mut parts, "until", "addr")?;
                Ok(Command::Until { addr: parse_addr(addr_s)? })
            }
            "fill" => {
                let start_s = require(&mut parts, "fill", "start")?;
                let end_s = require(&mut parts, "fill", "end")?;
                let byte_s = require(&mut parts, "fill", "byte")?;
                let start = parse_addr(start_s)?;
                let end = parse_addr(end_s)?;
                let byte = parse_u8_flexible(byte_s).ok_or_else(|| CliParseError::InvalidByte(byte_s.to_string()))?;
                Ok(Command::Fill { start, end, byte })
            }
            "mount" => {
                let drive_s = require(&mut parts, "mount", "drive:1..8")?;
                let path = require(&mut parts, "mount", "path")?;
                let drive = parse_drive_number(drive_s)?;
                Ok(Command::Mount { drive, path: path.to_string() })
            }
            "unmount" => {
                let drive_s = require(&mut parts, "unmount", "drive:1..8")?;
                Ok(Command::Unmount { drive: parse_drive_number(drive_s)? })
            }
            "boot" => {
                let path = require(&mut parts, "boot", "path")?;
                Ok(Command::BootFile { path: path.to_string() })
            }
            "state" => {
                let sub = require(&mut parts, "state", "save|load")?;
                let path = require(&mut parts, "state", "path")?;
                match sub {
                    "save" => Ok(Command::StateSave { path: path.to_string() }),
                    "load" => Ok(Command::StateLoad { path: path.to_string() }),
                    other => Err(CliParseError::InvalidCommand(format!("state {other}"))),
                }
            }
            "inject" => {
                let sub = require(&mut parts, "inject", "basic|keys")?;
                match sub {
                    "basic" => {
                        let b64 = require(&mut parts, "inject basic", "base64")?;
                        Ok(Command::InjectBasic { base64: b64.to_string() })
                    }
                    "keys" => {
                        let rest: Vec<&str> = parts.copied().collect();
                        Ok(Command::InjectKeys { text: rest.join(" ") })
                    }
                    other => Err(CliParseError::InvalidCommand(format!("inject {other}"))),
                }
            }
            "basic" => parse_basic(&mut parts).map(Command::Basic),
            "dos" => parse_dos(&mut parts).map(Command::Dos),
            other => Err(CliParseError::InvalidCommand(other.to_string())),
        }
    }

    /// Encode this command as a request line, without the `CMD:` prefix.
    pub fn encode(&self) -> String {
        match self {
            Command::Ping => "ping".to_string(),
            Command::Version => "version".to_string(),
            Command::Quit => "quit".to_string(),
            Command::Shutdown => "shutdown".to_string(),
            Command::Pause => "pause".to_string(),
            Command::Resume => "resume".to_string(),
            Command::Status => "status".to_string(),
            Command::Drives => "drives".to_string(),
            Command::Screen { atascii } => {
                if *atascii { "screen atascii".to_string() } else { "screen".to_string() }
            }
            Command::Screenshot { path } => match path {
                Some(p) => format!("screenshot {p}"),
                None => "screenshot".to_string(),
            },
            Command::Step { count } => format!("step {count}"),
            Command::Reset { cold } => format!("reset {}", if *cold { "cold" } else { "warm" }),
            Command::Read { addr, count } => format!("read ${addr:04X} {count}"),
            Command::Write { addr, bytes } => format!("write ${addr:04X} {}", encode_byte_list(bytes)),
            Command::RegistersRead => "registers".to_string(),
            Command::RegistersWrite { assignments } => {
                let parts: Vec<String> =
                    assignments.iter().map(|a| format!("{}=${:04X}", a.register, a.value)).collect();
                format!("registers {}", parts.join(" "))
            }
            Command::BreakpointSet { addr } => format!("breakpoint set ${addr:04X}"),
            Command::BreakpointClear { addr } => format!("breakpoint clear ${addr:04X}"),
            Command::BreakpointClearAll => "breakpoint clearall".to_string(),
            Command::BreakpointList => "breakpoint list".to_string(),
            Command::Disassemble { addr, lines } => {
                let mut s = "disassemble".to_string();
                if let Some(addr) = addr {
                    s.push_str(&format!(" ${addr:04X}"));
                }
                if let Some(lines) = lines {
                    s.push_str(&format!(" {lines}"));
                }
                s
            }
            Command::Assemble { addr, instruction } => match instruction {
                Some(i) => format!("assemble ${addr:04X} {i}"),
                None => format!("assemble ${addr:04X}"),
            },
            Command::AssembleInput { instruction } => format!("assemble input {instruction}"),
            Command::AssembleEnd => "assemble end".to_string(),
            Command::StepOver => "stepover".to_string(),
            Command::Until { addr } => format!("until ${addr:04X}"),
            Command::Fill { start, end, byte } => format!("fill ${start:04X} ${end:04X} ${byte:02X}"),
            Command::Mount { drive, path } => format!("mount {drive} {path}"),
            Command::Unmount { drive } => format!("unmount {drive}"),
            Command::BootFile { path } => format!("boot {path}"),
            Command::StateSave { path } => format!("state save {path}"),
            Command::StateLoad { path } => format!("state load {path}"),
            Command::InjectBasic { base64 } => format!("inject basic {base64}"),
            Command::InjectKeys { text } => format!("inject keys {text}"),
            Command::Basic(cmd) => format!("basic {}", encode_basic(cmd)),
            Command::Dos(cmd) => format!("dos {}", encode_dos(cmd)),
        }
    }
}

fn parse_drive_number(s: &str) -> Result<u8, CliParseError> {
    s.parse::<u8>()
        .ok()
        .filter(|n| (1..=8).contains(n))
        .ok_or_else(|| CliParseError::InvalidDriveNumber(s.to_string()))
}

fn parse_basic(parts: &mut std::slice::Iter<'_, &str>) -> Result<BasicCommand, CliParseError> {
    let sub_raw = require(parts, "basic", "verb")?;
    let sub = sub_raw.to_ascii_uppercase();
    match sub.as_str() {
        "NEW" => Ok(BasicCommand::New),
        "RUN" => Ok(BasicCommand::Run),
        "LIST" => {
            let atascii = matches!(parts.clone().next(), Some(&w) if w.eq_ignore_ascii_case("atascii"));
            Ok(BasicCommand::List { atascii })
        }
        "DEL" => {
            let target = require(parts, "basic del", "line-or-range")?;
            Ok(BasicCommand::Del { target: target.to_string() })
        }
        "STOP" => Ok(BasicCommand::Stop),
        "CONT" => Ok(BasicCommand::Cont),
        "VARS" => Ok(BasicCommand::Vars),
        "VAR" => {
            let name = require(parts, "basic var", "name")?;
            Ok(BasicCommand::Var { name: name.to_string() })
        }
        "INFO" => Ok(BasicCommand::Info),
        "EXPORT" => {
            let path = require(parts, "basic export", "path")?;
            Ok(BasicCommand::Export { path: path.to_string() })
        }
        "IMPORT" => {
            let path = require(parts, "basic import", "path")?;
            Ok(BasicCommand::Import { path: path.to_string() })
        }
        "DIR" => Ok(BasicCommand::Dir { drive: parts.next().map(|s| s.to_string()) }),
        "RENUM" => {
            let start = parts
                .next()
                .map(|s| s.parse::<u32>().map_err(|_| CliParseError::InvalidValue(s.to_string())))
                .transpose()?;
            let step = parts
                .next()
                .map(|s| s.parse::<u32>().map_err(|_| CliParseError::InvalidValue(s.to_string())))
                .transpose()?;
            Ok(BasicCommand::Renum { start, step })
        }
        "SAVE" => {
            let target = require(parts, "basic save", "D[n]:name")?;
            Ok(BasicCommand::Save { target: target.to_string() })
        }
        "LOAD" => {
            let target = require(parts, "basic load", "D[n]:name")?;
            Ok(BasicCommand::Load { target: target.to_string() })
        }
        other => Err(CliParseError::InvalidCommand(format!("basic {other}"))),
    }
}

fn encode_basic(cmd: &BasicCommand) -> String {
    match cmd {
        BasicCommand::New => "NEW".to_string(),
        BasicCommand::Run => "RUN".to_string(),
        BasicCommand::List { atascii } => {
            if *atascii { "LIST ATASCII".to_string() } else { "LIST".to_string() }
        }
        BasicCommand::Del { target } => format!("DEL {target}"),
        BasicCommand::Stop => "STOP".to_string(),
        BasicCommand::Cont => "CONT".to_string(),
        BasicCommand::Vars => "VARS".to_string(),
        BasicCommand::Var { name } => format!("VAR {name}"),
        BasicCommand::Info => "INFO".to_string(),
        BasicCommand::Export { path } => format!("EXPORT {path}"),
        BasicCommand::Import { path } => format!("IMPORT {path}"),
        BasicCommand::Dir { drive } => match drive {
            Some(d) => format!("DIR {d}"),
            None => "DIR".to_string(),
        },
        BasicCommand::Renum { start, step } => {
            let mut s = "RENUM".to_string();
            if let Some(start) = start {
                s.push_str(&format!(" {start}"));
            }
            if let Some(step) = step {
                s.push_str(&format!(" {step}"));
            }
            s
        }
        BasicCommand::Save { target } => format!("SAVE {target}"),
        BasicCommand::Load { target } => format!("LOAD {target}"),
        BasicCommand::LineEdit { line, text } => {
            if text.is_empty() {
                line.to_string()
            } else {
                format!("{line} {text}")
            }
        }
    }
}

fn parse_dos(parts: &mut std::slice::Iter<'_, &str>) -> Result<DosCommand, CliParseError> {
    let sub = require(parts, "dos", "verb")?.to_ascii_lowercase();
    match sub.as_str() {
        "cd" => Ok(DosCommand::Cd { drive: require(parts, "dos cd", "drive")?.to_string() }),
        "dir" => Ok(DosCommand::Dir { pattern: parts.next().map(|s| s.to_string()) }),
        "info" => Ok(DosCommand::Info { file: require(parts, "dos info", "file")?.to_string() }),
        "type" => Ok(DosCommand::Type { file: require(parts, "dos type", "file")?.to_string() }),
        "dump" => Ok(DosCommand::Dump { file: require(parts, "dos dump", "file")?.to_string() }),
        "lock" => Ok(DosCommand::Lock { file: require(parts, "dos lock", "file")?.to_string() }),
        "unlock" => Ok(DosCommand::Unlock { file: require(parts, "dos unlock", "file")?.to_string() }),
        "delete" => Ok(DosCommand::Delete { file: require(parts, "dos delete", "file")?.to_string() }),
        "copy" => {
            let src = require(parts, "dos copy", "src")?.to_string();
            let dst = require(parts, "dos copy", "dst")?.to_string();
            Ok(DosCommand::Copy { src, dst })
        }
        "rename" => {
            let src = require(parts, "dos rename", "src")?.to_string();
            let dst = require(parts, "dos rename", "dst")?.to_string();
            Ok(DosCommand::Rename { src, dst })
        }
        "export" => {
            let file = require(parts, "dos export", "file")?.to_string();
            let hostpath = require(parts, "dos export", "hostpath")?.to_string();
            Ok(DosCommand::Export { file, hostpath })
        }
        "import" => {
            let hostpath = require(parts, "dos import", "hostpath")?.to_string();
            let file = require(parts, "dos import", "file")?.to_string();
            Ok(DosCommand::Import { hostpath, file })
        }
        "newdisk" => {
            let path = require(parts, "dos newdisk", "path")?.to_string();
            let density = match parts.next() {
                None => None,
                Some(&"sd") => Some(DiskDensity::Single),
                Some(&"ed") => Some(DiskDensity::Enhanced),
                Some(&"dd") => Some(DiskDensity::Double),
                Some(other) => return Err(CliParseError::InvalidValue(other.to_string())),
            };
            Ok(DosCommand::NewDisk { path, density })
        }
        "format" => Ok(DosCommand::Format),
        other => Err(CliParseError::InvalidCommand(format!("dos {other}"))),
    }
}

fn encode_dos(cmd: &DosCommand) -> String {
    match cmd {
        DosCommand::Cd { drive } => format!("cd {drive}"),
        DosCommand::Dir { pattern } => match pattern {
            Some(p) => format!("dir {p}"),
            None => "dir".to_string(),
        },
        DosCommand::Info { file } => format!("info {file}"),
        DosCommand::Type { file } => format!("type {file}"),
        DosCommand::Dump { file } => format!("dump {file}"),
        DosCommand::Lock { file } => format!("lock {file}"),
        DosCommand::Unlock { file } => format!("unlock {file}"),
        DosCommand::Delete { file } => format!("delete {file}"),
        DosCommand::Copy { src, dst } => format!("copy {src} {dst}"),
        DosCommand::Rename { src, dst } => format!("rename {src} {dst}"),
        DosCommand::Export { file, hostpath } => format!("export {file} {hostpath}"),
        DosCommand::Import { hostpath, file } => format!("import {hostpath} {file}"),
        DosCommand::NewDisk { path, density } => {
            let suffix = match density {
                Some(DiskDensity::Single) => " sd",
                Some(DiskDensity::Enhanced) => " ed",
                Some(DiskDensity::Double) => " dd",
                None => "",
            };
            format!("newdisk {path}{suffix}")
        }
        DosCommand::Format => "format".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ping() {
        assert_eq!(Command::parse("ping").unwrap(), Command::Ping);
    }

    #[test]
    fn parses_reset_cold_by_default() {
        assert_eq!(Command::parse("reset").unwrap(), Command::Reset { cold: true });
        assert_eq!(Command::parse("reset cold").unwrap(), Command::Reset { cold: true });
    }

    #[test]
    fn rejects_invalid_reset_type() {
        assert_eq!(
            Command::parse("reset sideways"),
            Err(CliParseError::InvalidResetType("sideways".to_string()))
        );
    }

    #[test]
    fn parses_read_with_dollar_addr() {
        let cmd = Command::parse("read $0600 16").unwrap();
        assert_eq!(cmd, Command::Read { addr: 0x0600, count: 16 });
    }

    #[test]
    fn parses_read_with_0x_addr_and_decimal_addr() {
        assert_eq!(Command::parse("read 0x0600 16").unwrap(), Command::Read { addr: 0x0600, count: 16 });
        assert_eq!(Command::parse("read 1536 16").unwrap(), Command::Read { addr: 1536, count: 16 });
    }

    #[test]
    fn parses_write_comma_separated_bytes() {
        let cmd = Command::parse("write $0600 $01,$02,03").unwrap();
        assert_eq!(cmd, Command::Write { addr: 0x0600, bytes: vec![1, 2, 3] });
    }

    #[test]
    fn rejects_invalid_address() {
        assert_eq!(Command::parse("read zzz 1"), Err(CliParseError::InvalidAddress("zzz".to_string())));
    }

    #[test]
    fn registers_with_no_args_is_a_read() {
        assert_eq!(Command::parse("registers").unwrap(), Command::RegistersRead);
    }

    #[test]
    fn parses_registers_write_assignments() {
        let cmd = Command::parse("registers A=$10 PC=$0600").unwrap();
        assert_eq!(
            cmd,
            Command::RegistersWrite {
                assignments: vec![
                    RegisterAssignment { register: "A".to_string(), value: 0x10 },
                    RegisterAssignment { register: "PC".to_string(), value: 0x0600 },
                ]
            }
        );
    }

    #[test]
    fn rejects_unknown_register() {
        assert_eq!(Command::parse("registers ZZ=1"), Err(CliParseError::InvalidRegister("ZZ".to_string())));
    }

    #[test]
    fn missing_argument_reports_command_and_expected() {
        let err = Command::parse("read").unwrap_err();
        assert_eq!(
            err,
            CliParseError::MissingArgument { command: "read".to_string(), expected: "count".to_string() }
        );
    }

    #[test]
    fn breakpoint_family_round_trips() {
        for line in ["breakpoint set $0600", "breakpoint clear $0600", "breakpoint clearall", "breakpoint list"] {
            let cmd = Command::parse(line).unwrap();
            assert_eq!(Command::parse(&cmd.encode()).unwrap(), cmd);
        }
    }

    #[test]
    fn disassemble_aliases_are_equivalent() {
        let a = Command::parse("disassemble $0600 10").unwrap();
        let b = Command::parse("disasm $0600 10").unwrap();
        let c = Command::parse("d $0600 10").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn assemble_interactive_session_forms() {
        assert_eq!(
            Command::parse("asm input LDA #$10").unwrap(),
            Command::AssembleInput { instruction: "LDA #$10".to_string() }
        );
        assert_eq!(Command::parse("asm end").unwrap(), Command::AssembleEnd);
    }

    #[test]
    fn mount_requires_drive_in_range() {
        assert!(Command::parse("mount 9 game.atr").is_err());
        assert_eq!(
            Command::parse("mount 1 game.atr").unwrap(),
            Command::Mount { drive: 1, path: "game.atr".to_string() }
        );
    }

    #[test]
    fn inject_keys_preserves_escape_sequences_literally() {
        let cmd = Command::parse(r"inject keys HELLO\sWORLD\n").unwrap();
        assert_eq!(cmd, Command::InjectKeys { text: r"HELLO\sWORLD\n".to_string() });
    }

    #[test]
    fn basic_line_edit_passes_through_verbatim() {
        let cmd = Command::parse("10 PRINT \"HI\"").unwrap();
        assert_eq!(cmd, Command::Basic(BasicCommand::LineEdit { line: 10, text: "PRINT \"HI\"".to_string() }));
    }

    #[test]
    fn basic_family_round_trips() {
        for line in ["basic NEW", "basic LIST ATASCII", "basic VAR X", "basic RENUM 10 10"] {
            let cmd = Command::parse(line).unwrap();
            assert_eq!(Command::parse(&cmd.encode()).unwrap(), cmd);
        }
    }

    #[test]
    fn dos_family_round_trips() {
        for line in [
            "dos cd 1",
            "dos dir *.atr",
            "dos copy a.bas b.bas",
            "dos newdisk blank.atr dd",
            "dos format",
        ] {
            let cmd = Command::parse(line).unwrap();
            assert_eq!(Command::parse(&cmd.encode()).unwrap(), cmd);
        }
    }

    #[test]
    fn unrecognized_verb_is_invalid_command() {
        assert_eq!(Command::parse("frobnicate"), Err(CliParseError::InvalidCommand("frobnicate".to_string())));
    }

    #[test]
    fn parser_is_total_over_empty_and_whitespace_lines() {
        assert!(Command::parse("").is_err());
        assert!(Command::parse("   ").is_err());
    }

    #[test]
    fn verbs_are_case_insensitive() {
        assert_eq!(Command::parse("PING").unwrap(), Command::Ping);
        assert_eq!(Command::parse("Reset Cold").unwrap(), Command::Reset { cold: true });
    }
}
