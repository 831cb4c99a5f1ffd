//! Newline-delimited JSON request loop.
//!
//! One request per input line, one response per output line, in order.
//! Blank lines are ignored; a line that is not a valid request still gets a
//! response carrying the parse error.

use kphttp_core::{Host, Request, Response};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Serve requests from `reader` until end of input.
///
/// Returns the number of responses written.
pub async fn serve<R, W>(host: &Host, reader: R, mut writer: W) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut answered = 0;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => host.handle(request).await,
            Err(e) => malformed(&e),
        };

        let mut json = serde_json::to_string(&response)?;
        json.push('\n');
        writer.write_all(json.as_bytes()).await?;
        writer.flush().await?;
        answered += 1;
        debug!(request_type = %response.request_type, success = response.success, "response written");
    }

    info!(answered, "input closed");
    Ok(answered)
}

fn malformed(error: &serde_json::Error) -> Response {
    warn!(error = %error, "malformed request line");
    let mut response = Response::new("", None);
    response.error = Some(format!("Malformed request: {error}"));
    response
}
