//! Bounded capture of child process output.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

const TRUNCATION_NOTICE: &str = "... (output truncated due to size limit)\n";

/// Text read from one stream
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(super) struct CapturedOutput {
    /// Captured lines, cut off at the byte cap
    pub text: String,
    /// Payload of the last line starting with the marker, marker stripped
    pub marked: Option<String>,
    pub truncated: bool,
}

impl CapturedOutput {
    /// Last non-empty line of the captured text
    pub fn last_line(&self) -> Option<&str> {
        self.text
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty() && *line != TRUNCATION_NOTICE.trim())
    }
}

/// Read `reader` to the end, keeping at most `max_bytes` of ordinary lines.
///
/// Lines beginning with `marker` are set aside instead of being counted
/// against the cap, together with the blank line the writer emits to start
/// the marker on a fresh line. The stream is drained past the cap so the
/// writer never blocks on a full pipe.
pub(super) async fn read_output_limited<R: AsyncRead + Unpin>(
    reader: R,
    max_bytes: u64,
    marker: Option<String>,
) -> CapturedOutput {
    let mut reader = BufReader::new(reader);
    let mut captured = CapturedOutput::default();
    let mut total_bytes: u64 = 0;
    let mut blank_tail = false;
    let mut line = Vec::new();
    // one oversized write is split rather than buffered whole
    let line_limit = max_bytes.saturating_add(1).max(4096);

    loop {
        line.clear();
        match (&mut reader).take(line_limit).read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(_) => break,
        }

        let text = String::from_utf8_lossy(&line);
        if let Some(marker) = marker.as_deref() {
            if let Some(payload) = text.trim_end_matches(['\n', '\r']).strip_prefix(marker) {
                captured.marked = Some(payload.to_string());
                if blank_tail {
                    captured.text.pop();
                    total_bytes -= 1;
                    blank_tail = false;
                }
                continue;
            }
        }

        total_bytes += line.len() as u64;
        if total_bytes > max_bytes {
            if !captured.truncated {
                captured.truncated = true;
                captured.text.push_str(TRUNCATION_NOTICE);
            }
            blank_tail = false;
            continue;
        }
        blank_tail = line == b"\n";
        captured.text.push_str(&text);
    }

    captured
}
