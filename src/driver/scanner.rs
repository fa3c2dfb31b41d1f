//! Line scanner for merged tool output
//!
//! The tool's last line is its result; every line before it is progress.
//! The result can only be identified once the stream ends, so the scanner
//! holds one line back and classifies it when the next read returns.

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// One classified item of tool output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanItem {
    /// A line that is not the last one
    Progress(String),

    /// The last line of the stream
    Final(String),

    /// The stream has ended; after a `Final` or on empty output
    Eof,
}

pub struct OutputScanner<R> {
    reader: R,
    held: Option<String>,
    finished: bool,
}

impl<R: AsyncBufRead + Unpin> OutputScanner<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            held: None,
            finished: false,
        }
    }

    /// Read the next classified item
    pub async fn next_item(&mut self) -> std::io::Result<ScanItem> {
        if self.finished {
            return Ok(ScanItem::Eof);
        }

        loop {
            let mut buf = Vec::with_capacity(256);
            let read = self.reader.read_until(b'\n', &mut buf).await?;

            if read == 0 {
                self.finished = true;
                return Ok(match self.held.take() {
                    Some(line) => ScanItem::Final(line),
                    None => ScanItem::Eof,
                });
            }

            let line = trim_line_ending(&buf);
            if let Some(previous) = self.held.replace(line) {
                return Ok(ScanItem::Progress(previous));
            }
        }
    }
}

fn trim_line_ending(buf: &[u8]) -> String {
    let mut end = buf.len();
    if end > 0 && buf[end - 1] == b'\n' {
        end -= 1;
    }
    if end > 0 && buf[end - 1] == b'\r' {
        end -= 1;
    }
    String::from_utf8_lossy(&buf[..end]).into_owned()
}
