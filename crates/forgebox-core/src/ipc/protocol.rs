//! IPC protocol messages for the shared host process.
//!
//! Uses length-prefixed JSON messages over stdin/stdout.
//! Format: 4-byte length (u32 LE) + `serde_json` body.

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::script::ScriptContext;

/// Upper bound on a single frame body.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Command sent from the sandbox to the host bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostCommand {
    /// Ping to check if the host is alive.
    Ping,

    /// Run one script in a fresh namespace.
    Execute {
        /// Script id, echoed back in the response.
        id: String,
        source: String,
        #[serde(default)]
        context: ScriptContext,
        /// Directory the bridge switches to for the duration of the script.
        working_dir: String,
        /// Builtins and top-level modules the namespace exposes.
        allowed_names: Vec<String>,
    },

    /// Shutdown the host gracefully.
    Shutdown,
}

/// Response sent from the host bridge to the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostResponse {
    /// Response to Ping command.
    Pong,

    /// The script ran to completion or raised.
    Finished {
        id: String,
        stdout: String,
        stderr: String,
        exit_code: i32,
    },

    /// The bridge hit an error outside any script and cannot continue.
    Fatal { message: String },

    /// Acknowledgement of shutdown request.
    ShuttingDown,
}

/// Write a message to a writer using length-prefixed JSON encoding.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(Error::Ipc(format!(
            "IPC message too large: {} bytes",
            bytes.len()
        )));
    }

    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_le_bytes())
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message length: {}", e)))?;
    writer
        .write_all(&bytes)
        .map_err(|e| Error::Ipc(format!("Failed to write IPC message body: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("Failed to flush IPC stream: {}", e)))?;

    Ok(())
}

/// Read a message from a reader using length-prefixed JSON encoding.
pub fn read_message<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T> {
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message length: {}", e)))?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_FRAME_BYTES {
        return Err(Error::Ipc(format!("IPC message too large: {} bytes", len)));
    }

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .map_err(|e| Error::Ipc(format!("Failed to read IPC message body: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| Error::Ipc(format!("Failed to decode IPC message: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_command_wire_format() {
        let mut context = ScriptContext::new();
        context.insert("radius".to_string(), serde_json::json!(2.5));
        let cmd = HostCommand::Execute {
            id: "abc".to_string(),
            source: "x = 1".to_string(),
            context,
            working_dir: "/tmp".to_string(),
            allowed_names: vec!["math".to_string()],
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &cmd).unwrap();

        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        assert_eq!(len, buf.len() - 4);
        let body: serde_json::Value = serde_json::from_slice(&buf[4..]).unwrap();
        assert_eq!(body["type"], "execute");
        assert_eq!(body["context"]["radius"], 2.5);

        let decoded: HostCommand = read_message(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn test_unit_variants_are_tagged() {
        let mut buf = Vec::new();
        write_message(&mut buf, &HostResponse::ShuttingDown).unwrap();
        assert_eq!(&buf[4..], br#"{"type":"shutting_down"}"#);
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let mut buf = ((MAX_FRAME_BYTES + 1) as u32).to_le_bytes().to_vec();
        buf.extend_from_slice(b"{}");
        let err = read_message::<_, HostResponse>(&mut Cursor::new(buf)).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_truncated_stream() {
        let mut buf = 10u32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"{\"ty");
        let err = read_message::<_, HostResponse>(&mut Cursor::new(buf)).unwrap_err();
        assert!(err.to_string().contains("Failed to read IPC message body"));
    }

    #[test]
    fn test_garbage_body() {
        let mut buf = 3u32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"n/a");
        let err = read_message::<_, HostCommand>(&mut Cursor::new(buf)).unwrap_err();
        assert!(err.to_string().contains("Failed to decode IPC message"));
    }
}
