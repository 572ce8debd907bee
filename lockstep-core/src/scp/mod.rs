//! The bare minimum of the scp-over-ssh protocol: downloading and
//! uploading exactly one file.
//!
//! The protocol is essentially undocumented outside of OpenSSH source,
//! so the exchanges we rely on are written down here. Every message is
//! acknowledged with a single response byte: `0x00` ok, `0x01` warning,
//! `0x02` fatal; warnings and fatals carry a message up to `\n`.
//!
//! Source mode (`scp -qf FILE`, remote-to-local pull, we receive):
//!
//! ```text
//! client: 0x00
//! remote: C<mode> <length> <basename>\n
//! client: 0x00
//! remote: <length> bytes of data, then 0x00
//! client: 0x00
//! ```
//!
//! Sink mode (`scp -qt FILE`, local-to-remote push, we send) is the
//! mirror image: the remote acknowledges our header, our data, and our
//! terminating zero byte.
//!
//! The protocol functions are generic over any `Read + Write` stream so
//! they can be exercised against an in-memory peer; [`ssh`] supplies the
//! real transport.

pub mod ssh;

pub use ssh::{HostKey, SshConfig, SshSession};

use std::io::{Read, Write};
use thiserror::Error;

/// Errors from a transfer
#[derive(Error, Debug)]
pub enum ScpError {
    /// The remote scp process reported a warning (code 1) or fatal
    /// (code 2).
    #[error("remote scp error code {code}: {msg}")]
    Remote { code: u8, msg: String },

    /// The remote sent bytes that do not fit the protocol.
    #[error("scp protocol error: {0}")]
    Protocol(String),

    /// The host's key was rejected, either by the user or because it
    /// changed since it was trusted.
    #[error("host key rejected: {0}")]
    HostKey(String),

    #[error("ssh failure: {0}")]
    Ssh(String),

    #[error("transfer io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ssh2::Error> for ScpError {
    fn from(err: ssh2::Error) -> Self {
        ScpError::Ssh(err.to_string())
    }
}

/// Result type for transfers
pub type Result<T> = std::result::Result<T, ScpError>;

/// True when the error is the remote saying the file does not exist —
/// the only way to tell a first push from a real failure.
pub fn is_not_found(err: &ScpError) -> bool {
    match err {
        ScpError::Remote { code: 1, msg } => {
            msg.to_lowercase().contains("no such file or directory")
        }
        _ => false,
    }
}

/// A file pulled from the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpFile {
    pub name: String,
    pub mode: i32,
    pub contents: Vec<u8>,
}

/// Run the receiving half of source mode over an established stream.
pub fn recv<S: Read + Write>(stream: &mut S) -> Result<ScpFile> {
    // The initial zero byte tells the remote to start.
    send_ok(stream)?;

    let header = read_line(stream)?;
    let header = match header.first() {
        Some(&b'C') => &header[1..],
        Some(&(code @ (1 | 2))) => {
            return Err(ScpError::Remote {
                code,
                msg: String::from_utf8_lossy(&header[1..]).trim().to_string(),
            })
        }
        Some(other) => {
            return Err(ScpError::Protocol(format!(
                "want initial header byte 'C', got {other:#04x}"
            )))
        }
        None => return Err(ScpError::Protocol("empty header".into())),
    };

    let header = String::from_utf8_lossy(header);
    let fields: Vec<&str> = header.split_whitespace().collect();
    if fields.len() != 3 {
        return Err(ScpError::Protocol(format!(
            "header wants 3 fields, got {}",
            fields.len()
        )));
    }

    let mode = i32::from_str_radix(fields[0], 8)
        .map_err(|_| ScpError::Protocol(format!("bad file mode {:?}", fields[0])))?;
    let length: i64 = fields[1]
        .parse()
        .ok()
        .filter(|len| *len >= 0)
        .ok_or_else(|| ScpError::Protocol(format!("bad file length {:?}", fields[1])))?;

    // Acknowledge the header; the data follows.
    send_ok(stream)?;

    let mut contents = vec![0u8; length as usize + 1];
    stream.read_exact(&mut contents)?;
    match contents.pop() {
        Some(0) => {}
        _ => {
            return Err(ScpError::Protocol(
                "missing zero byte after file data".into(),
            ))
        }
    }

    send_ok(stream)?;

    Ok(ScpFile {
        name: fields[2].to_string(),
        mode,
        contents,
    })
}

/// Run the sending half of sink mode over an established stream.
///
/// `name` is the basename written into the header; the destination path
/// itself was given to the remote scp on its command line. Whitespace in
/// the name cannot be expressed in the protocol.
pub fn send<S: Read + Write>(stream: &mut S, name: &str, mode: i32, contents: &[u8]) -> Result<()> {
    if name.contains(char::is_whitespace) || name.is_empty() {
        return Err(ScpError::Protocol(format!(
            "filename {name:?} cannot be sent over scp"
        )));
    }

    // The remote signals readiness before anything else.
    read_response(stream)?;

    let header = format!("C0{:o} {} {}\n", mode, contents.len(), name);
    stream.write_all(header.as_bytes())?;
    stream.flush()?;
    read_response(stream)?;

    stream.write_all(contents)?;
    stream.write_all(&[0])?;
    stream.flush()?;
    read_response(stream)?;

    Ok(())
}

fn send_ok<W: Write>(stream: &mut W) -> Result<()> {
    stream.write_all(&[0])?;
    stream.flush()?;
    Ok(())
}

/// Read one response byte, plus the message line for warnings and
/// fatals.
fn read_response<S: Read + Write>(stream: &mut S) -> Result<()> {
    let mut byte = [0u8; 1];
    stream.read_exact(&mut byte)?;
    match byte[0] {
        0 => Ok(()),
        code @ (1 | 2) => {
            let msg = read_line(stream)?;
            Err(ScpError::Remote {
                code,
                msg: String::from_utf8_lossy(&msg).trim().to_string(),
            })
        }
        other => Err(ScpError::Protocol(format!(
            "unknown response byte {other:#04x}"
        ))),
    }
}

// Bytes up to but excluding '\n', read one at a time so nothing past
// the line is consumed.
fn read_line<R: Read>(stream: &mut R) -> Result<Vec<u8>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        stream.read_exact(&mut byte)?;
        if byte[0] == b'\n' {
            return Ok(line);
        }
        line.push(byte[0]);
        if line.len() > 4096 {
            return Err(ScpError::Protocol("header line unreasonably long".into()));
        }
    }
}
