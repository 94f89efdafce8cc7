//! One worker connection on the dispatch server.

use crate::coordinator::{allocator::RangeAllocator, server::DispatchJob};
use labelgrid_core::{
    Error, Result,
    codec::{WireConn, decode_solution},
    types::{ComputeResult, PROTOCOL_TOKEN, WorkRange},
};
use std::sync::Arc;
use tokio::{
    io::{AsyncRead, AsyncWrite, BufStream},
    sync::mpsc,
};

/// A completed range on its way to the assembler.
#[derive(Debug)]
pub struct RangeOutput {
    pub range: WorkRange,
    pub result: ComputeResult,
}

/// Serves one worker until the job is done or the connection fails.
///
/// A range whose result was not fully received is returned to the
/// allocator before the error propagates.
pub async fn serve_worker<S>(
    stream: S,
    job: Arc<DispatchJob>,
    allocator: Arc<RangeAllocator>,
    results: mpsc::Sender<RangeOutput>,
) -> Result<u64>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = WireConn::new(BufStream::new(stream));

    let token = conn.read_array::<16>().await?;
    if &token != PROTOCOL_TOKEN {
        return Err(Error::protocol(format!(
            "unexpected identification token {:?}",
            String::from_utf8_lossy(&token)
        )));
    }
    let hint = conn.read_u64().await?;

    conn.write_bytes(job.commitment.as_bytes()).await?;
    conn.write_u64(job.num_labels).await?;
    conn.flush().await?;
    tracing::debug!(hint, "Worker handshake complete");

    let mut completed = 0;
    while let Some(range) = allocator.acquire(hint).await {
        let result = match exchange(&mut conn, range).await {
            Ok(result) => result,
            Err(e) => {
                allocator.requeue(range);
                return Err(e);
            }
        };
        if results.send(RangeOutput { range, result }).await.is_err() {
            allocator.requeue(range);
            return Err(Error::ChannelError {
                context: "assembler stopped".to_string(),
            });
        }
        allocator.complete(range);
        completed += 1;
    }
    Ok(completed)
}

async fn exchange<S>(conn: &mut WireConn<BufStream<S>>, range: WorkRange) -> Result<ComputeResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    conn.write_u64(range.start).await?;
    conn.write_u64(range.end).await?;
    conn.flush().await?;

    let solution = decode_solution(conn.read_u64().await?);
    if let Some(index) = solution {
        if !range.contains(index) {
            return Err(Error::protocol(format!(
                "solution {index} lies outside {range}"
            )));
        }
    }
    let output = conn.read_bytes(range.output_len()?).await?;
    Ok(ComputeResult { output, solution })
}
