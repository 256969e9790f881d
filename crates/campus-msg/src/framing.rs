//! ---
//! campus_section: "02-messaging-ipc-data-model"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Message schema helpers and protocol codecs."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{MessagingError, Result};

/// Default upper bound for a single frame, newline excluded.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Read the next newline-terminated frame.
///
/// Returns `Ok(None)` on a clean end of stream. Blank lines are skipped. A
/// final frame without a trailing newline is still returned.
pub async fn read_frame<R>(reader: &mut R, max_bytes: usize) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut buf = Vec::new();
        let read = (&mut *reader)
            .take(max_bytes as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await?;
        if read == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        } else if buf.len() > max_bytes {
            return Err(MessagingError::FrameTooLarge { limit: max_bytes });
        }
        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        return String::from_utf8(buf)
            .map(Some)
            .map_err(|_| MessagingError::Protocol("frame is not valid utf-8".to_owned()));
    }
}

/// Serialize `message` as one frame and flush it.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize + ?Sized,
{
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn frames_are_split_on_newlines() {
        let input: &[u8] = b"{\"a\":1}\n\n{\"b\":2}\r\n{\"c\":3}";
        let mut reader = BufReader::new(input);
        assert_eq!(
            read_frame(&mut reader, 128).await.unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert_eq!(
            read_frame(&mut reader, 128).await.unwrap().as_deref(),
            Some("{\"b\":2}")
        );
        assert_eq!(
            read_frame(&mut reader, 128).await.unwrap().as_deref(),
            Some("{\"c\":3}")
        );
        assert_eq!(read_frame(&mut reader, 128).await.unwrap(), None);
    }

    #[tokio::test]
    async fn oversize_frames_are_rejected() {
        let input = format!("{}\n", "x".repeat(100));
        let mut reader = BufReader::new(input.as_bytes());
        assert!(matches!(
            read_frame(&mut reader, 16).await,
            Err(MessagingError::FrameTooLarge { limit: 16 })
        ));
    }

    #[tokio::test]
    async fn written_frames_are_newline_terminated() {
        let mut out = Vec::new();
        write_frame(&mut out, &json!({"command": "ping"}))
            .await
            .unwrap();
        assert_eq!(out, b"{\"command\":\"ping\"}\n");
    }
}
