//! Child side of the process pool.

use decode::{record_line, DecodeWorker};
use records::InferenceRecord;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::{decode_task, salvage_index, READY_LINE};
use crate::types::DispatchError;

/// Announce readiness, then answer every task line with one record line
/// until `input` reaches EOF. Returns the number of tasks served.
///
/// Call this only after the model is open: the parent treats the ready
/// line as "this replica can decode".
pub async fn serve<R, W>(worker: &DecodeWorker, input: R, mut output: W) -> Result<usize, DispatchError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    output.write_all(READY_LINE.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await?;

    let mut lines = input.lines();
    let mut served = 0;
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match decode_task(&line) {
            Ok(task) => worker.decode_line(&task).await,
            Err(e) => {
                tracing::warn!(error = %e, "Received an invalid task line");
                record_line(&InferenceRecord::failed(
                    salvage_index(&line).unwrap_or_default(),
                    format!("invalid task line: {e}"),
                    format!("{e:?}"),
                ))
            }
        };
        output.write_all(response.as_bytes()).await?;
        output.flush().await?;
        served += 1;
    }

    tracing::debug!(served, "Decode worker input closed");
    Ok(served)
}
