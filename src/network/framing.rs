// src/network/framing.rs
// Newline-delimited framing with a per-line size cap, shared by the factory RPC and promoted sessions.

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Frame {
    /// A complete line (without its terminator) or a final unterminated line before EOF
    Line(Vec<u8>),
    /// The line exceeded the cap; everything up to and including its newline was skipped
    Oversized,
    Eof,
}

/// Read one line of at most `max` bytes. An over-long line is consumed entirely
/// so the next read starts at the following line.
pub(crate) async fn read_frame<R>(reader: &mut R, max: usize) -> io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(max as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        if buf.len() <= max {
            return Ok(Frame::Line(buf));
        }
        return Ok(Frame::Oversized);
    }
    if buf.len() <= max {
        // EOF before the terminator
        return Ok(Frame::Line(buf));
    }
    skip_line(reader).await?;
    Ok(Frame::Oversized)
}

async fn skip_line<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (used, done) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(i) => (i + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(used);
        if done {
            return Ok(());
        }
    }
}
