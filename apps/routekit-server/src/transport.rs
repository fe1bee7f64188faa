//! Newline-delimited JSON transport: one dispatch request per input line,
//! one result object per output line, written as dispatches finish.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::Result;
use routekit::{ActionMapper, DispatchReport, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchInput {
    /// Correlation id echoed back in the output line.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub values: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct DispatchOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Response>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<DispatchReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchOutput {
    fn failed(id: Option<String>, error: String) -> Self {
        Self {
            id,
            response: None,
            report: None,
            error: Some(error),
        }
    }
}

/// Run one dispatch synchronously.
pub fn dispatch_one(mapper: &ActionMapper, input: DispatchInput) -> DispatchOutput {
    let DispatchInput {
        id,
        sender,
        context,
        action,
        format,
        values,
    } = input;

    let request = match mapper.new_request() {
        Ok(request) => request,
        Err(e) => return DispatchOutput::failed(id, format!("{:#}", anyhow::Error::from(e))),
    };
    {
        let mut req = request.write();
        req.set_route(sender, context, action);
        if let Some(format) = format {
            req.set_format(format);
        }
        for (key, value) in values {
            req.set_value(key, value);
        }
    }

    match mapper.dispatch(request) {
        Ok((response, report)) => DispatchOutput {
            id,
            response: Some(response.read().clone()),
            report: Some(report),
            error: None,
        },
        Err(e) => {
            let e = anyhow::Error::from(e);
            tracing::error!(error = %format!("{e:#}"), "dispatch failed");
            DispatchOutput::failed(id, format!("{e:#}"))
        }
    }
}

fn handle_line(mapper: &ActionMapper, line: &str) -> DispatchOutput {
    let input = match serde_json::from_str::<DispatchInput>(line) {
        Ok(input) => input,
        Err(e) => return DispatchOutput::failed(None, format!("invalid request line: {e}")),
    };
    let id = input.id.clone();
    // A panic outside handler code (a component constructor, say) fails this line only.
    catch_unwind(AssertUnwindSafe(|| dispatch_one(mapper, input))).unwrap_or_else(|_| {
        tracing::error!(id = ?id, "dispatch panicked");
        DispatchOutput::failed(id, "dispatch panicked".to_string())
    })
}

fn joined(done: Result<DispatchOutput, JoinError>) -> DispatchOutput {
    done.unwrap_or_else(|e| {
        tracing::error!(error = %e, "dispatch task failed");
        DispatchOutput::failed(None, format!("dispatch task failed: {e}"))
    })
}

async fn write_output<W: AsyncWrite + Unpin>(out: &mut W, output: &DispatchOutput) -> Result<()> {
    let mut line = serde_json::to_vec(output)?;
    line.push(b'\n');
    out.write_all(&line).await?;
    out.flush().await?;
    Ok(())
}

/// Serve dispatch requests from `input` until EOF or `shutdown` resolves.
///
/// At most `workers` dispatches run at once on the blocking pool. In-flight
/// dispatches are drained before returning. Returns how many lines were served.
pub async fn serve<R, W, S>(
    mapper: Arc<ActionMapper>,
    input: R,
    mut output: W,
    workers: usize,
    shutdown: S,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: Future<Output = ()>,
{
    let limit = Arc::new(Semaphore::new(workers.max(1)));
    let mut lines = input.lines();
    let mut tasks: JoinSet<DispatchOutput> = JoinSet::new();
    let mut served = 0usize;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!(in_flight = tasks.len(), "stopping intake");
                break;
            }
            Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                write_output(&mut output, &joined(done)).await?;
                served += 1;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                let permit = Arc::clone(&limit).acquire_owned().await?;
                let mapper = Arc::clone(&mapper);
                tasks.spawn_blocking(move || {
                    let _permit = permit;
                    handle_line(&mapper, &line)
                });
            }
        }
    }

    while let Some(done) = tasks.join_next().await {
        write_output(&mut output, &joined(done)).await?;
        served += 1;
    }
    tracing::info!(served, "transport closed");
    Ok(served)
}
