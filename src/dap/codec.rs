//! Content-Length framing for DAP messages
//!
//! ```text
//! Content-Length: <byte-length>\r\n
//! \r\n
//! <JSON body>
//! ```

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::{Error, Result};

/// Upper bound on a single frame body
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

fn closed_on_eof(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::AdapterClosed
    } else {
        Error::Io(e)
    }
}

/// Read one frame body from the adapter
///
/// Returns `Ok(None)` when the stream ends cleanly between frames.
/// A stream that ends inside a frame is `Error::AdapterClosed`.
pub async fn read_frame<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>> {
    let mut content_length: Option<usize> = None;
    let mut seen_header = false;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.map_err(closed_on_eof)?;
        if n == 0 {
            return if seen_header {
                Err(Error::AdapterClosed)
            } else {
                Ok(None)
            };
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            if seen_header {
                break;
            }
            continue;
        }
        seen_header = true;

        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("Content-Length") {
                let value = value.trim();
                content_length = Some(value.parse().map_err(|_| {
                    Error::DapProtocol(format!("Invalid Content-Length: {}", value))
                })?);
            }
        }
    }

    let len = content_length
        .ok_or_else(|| Error::DapProtocol("Missing Content-Length header".to_string()))?;
    if len > MAX_FRAME_LEN {
        return Err(Error::DapProtocol(format!(
            "Content-Length too large: {} bytes",
            len
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(closed_on_eof)?;

    String::from_utf8(body)
        .map(Some)
        .map_err(|e| Error::DapProtocol(format!("Invalid UTF-8: {}", e)))
}

/// Write one frame to the adapter and flush it
pub async fn write_frame<W: AsyncWrite + Unpin + ?Sized>(writer: &mut W, json: &str) -> Result<()> {
    let header = format!("Content-Length: {}\r\n\r\n", json.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}
