//! Unix-socket front end: one JSON object per line in, hook replies out.

use anyhow::{Context, Result};
use diskenc_core::signal::{decode_line, HookReply, HookRequest, Inbound};
use diskenc_core::{DeviceId, DiskencResult, EventBus, HookAnswer};
use log::{debug, info, warn};
use std::fs;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A password request in flight, queued in the order it arrived.
type PendingAnswer = JoinHandle<DiskencResult<HookAnswer>>;

/// Bind the agent socket, replacing a stale socket file left by a previous run.
pub(crate) fn bind(path: &Path) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create socket directory {}", parent.display()))?;
    }
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("remove stale socket {}", path.display()))?;
    }
    let listener =
        UnixListener::bind(path).with_context(|| format!("bind socket {}", path.display()))?;
    info!("listening on {}", path.display());
    Ok(listener)
}

pub(crate) async fn accept_loop(listener: UnixListener, bus: EventBus) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let bus = bus.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_connection(stream, bus).await {
                warn!("connection closed with error: {err:#}");
            }
        });
    }
}

/// Handle one peer until it hangs up.
///
/// Lines keep being read while password requests are outstanding, so
/// notifications behind a request are dispatched right away. Replies are
/// written in the order the requests arrived.
pub(crate) async fn serve_connection<S>(stream: S, bus: EventBus) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (pending_tx, pending_rx) = mpsc::unbounded_channel::<PendingAnswer>();
    let replies = tokio::spawn(write_replies(writer, pending_rx));
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match decode_line(&line) {
            Ok(Inbound::Signal(signal)) => {
                debug!("received {} for {}", signal.name(), signal.device());
                bus.publish(signal)?;
            }
            Ok(Inbound::Request(HookRequest::AcquireDevicePassword { device })) => {
                debug!("password requested for {device}");
                let bus = bus.clone();
                let answer =
                    tokio::spawn(async move { bus.acquire_password(DeviceId::new(device)).await });
                if pending_tx.send(answer).is_err() {
                    // The writer failed; its error is reported below.
                    break;
                }
            }
            Err(err) => warn!("skipping malformed line: {err}"),
        }
    }

    drop(pending_tx);
    replies.await.context("reply writer panicked")?
}

async fn write_replies<W>(
    mut writer: W,
    mut pending: mpsc::UnboundedReceiver<PendingAnswer>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(answer) = pending.recv().await {
        let answer = answer.await.context("password request panicked")??;
        let mut reply = serde_json::to_string(&HookReply::from(answer))?;
        reply.push('\n');
        writer.write_all(reply.as_bytes()).await?;
        writer.flush().await?;
    }
    Ok(())
}
