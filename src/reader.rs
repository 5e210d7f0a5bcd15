//! The reader task: sole owner of the transport's read half.
//!
//! MESSAGE frames are routed to their subscription channel, ERROR and
//! RECEIPT frames to a waiting `disconnect` or else the connection-level
//! channel. Anything else from the
//! broker is a protocol violation and ends the connection.

use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_util::codec::FramedRead;
use tracing::{debug, error, trace, warn};

use crate::codec::{StompCodec, StompItem};
use crate::config::{Deadlines, Direction};
use crate::connection::Shared;
use crate::error::ConnError;
use crate::frame::{self, Frame, MessageData};
use crate::headers;

/// Read the next item, bounded by the read deadline when one is set.
///
/// `None` is a clean end of stream.
pub(crate) async fn read_next<R>(
    stream: &mut FramedRead<R, StompCodec>,
    deadlines: &Deadlines,
) -> Option<Result<StompItem, ConnError>>
where
    R: AsyncRead + Unpin,
{
    match deadlines.read {
        Some(limit) => match timeout(limit, stream.next()).await {
            Ok(item) => item,
            Err(_) => {
                let err = ConnError::ReadDeadline;
                warn!(?limit, "read deadline expired");
                deadlines.notify(&err, Direction::Read);
                Some(Err(err))
            }
        },
        None => stream.next().await,
    }
}

enum Exit {
    Shutdown,
    Failed(ConnError),
}

/// Run until shutdown or a fatal read error, then tear the connection down.
pub(crate) async fn run<R>(
    mut stream: FramedRead<R, StompCodec>,
    shared: Arc<Shared>,
    conn_tx: mpsc::Sender<MessageData>,
    mut shutdown: broadcast::Receiver<()>,
) where
    R: AsyncRead + Unpin,
{
    debug!("reader started");
    let exit = loop {
        let item = tokio::select! {
            _ = shutdown.recv() => break Exit::Shutdown,
            item = read_next(&mut stream, &shared.options.deadlines) => item,
        };

        let frame = match item {
            Some(Ok(StompItem::Heartbeat)) => {
                trace!("heart-beat received");
                if let Some(hb) = shared.heartbeat.get() {
                    hb.record_receive(true);
                }
                continue;
            }
            Some(Ok(StompItem::Frame(f))) => f,
            Some(Err(ConnError::ReadDeadline)) => continue,
            Some(Err(e)) => break Exit::Failed(e),
            None => {
                break Exit::Failed(ConnError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by broker",
                )));
            }
        };

        shared.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        if let Some(hb) = shared.heartbeat.get() {
            hb.record_receive(false);
        }

        match dispatch(frame, &shared, &conn_tx, &mut shutdown).await {
            Ok(true) => {}
            Ok(false) => break Exit::Shutdown,
            Err(e) => break Exit::Failed(e),
        }
    };

    if let Exit::Failed(err) = exit {
        if err.is_eof() {
            debug!("broker closed the connection");
        } else {
            error!(error = %err, "connection failed");
        }
        let _ = conn_tx.try_send(MessageData::from_error(err));
    }
    shared.shut_down();
    shared.take_receipt_waiter().await;
    shared.registry.clear().await;
    drop(conn_tx);
    debug!("reader stopped");
}

/// Route one frame. `Ok(false)` means shutdown arrived while waiting on a
/// full channel.
async fn dispatch(
    msg: Frame,
    shared: &Shared,
    conn_tx: &mpsc::Sender<MessageData>,
    shutdown: &mut broadcast::Receiver<()>,
) -> Result<bool, ConnError> {
    let command = msg.command.clone();
    match command.as_str() {
        frame::MESSAGE => {
            let Some(sub_id) = msg.get_header(headers::SUBSCRIPTION).map(str::to_string) else {
                return Err(ConnError::Protocol(
                    "MESSAGE frame without subscription header".to_string(),
                ));
            };
            let Some(entry) = shared.registry.get_open(&sub_id).await else {
                debug!(subscription = %sub_id, "dropping MESSAGE for unknown or closed subscription");
                return Ok(true);
            };
            if entry.drain_should_drop(shared.options.drain_threshold) {
                trace!(subscription = %sub_id, "dropping MESSAGE while draining");
                return Ok(true);
            }
            tokio::select! {
                _ = shutdown.recv() => Ok(false),
                sent = entry.sender().send(MessageData::from_frame(msg)) => {
                    if sent.is_err() {
                        debug!(subscription = %sub_id, "subscription receiver gone");
                    }
                    Ok(true)
                }
            }
        }
        frame::ERROR | frame::RECEIPT => {
            if command == frame::ERROR {
                warn!(message = msg.get_header(headers::MESSAGE).unwrap_or(""), "ERROR frame from broker");
            }
            // a pending DISCONNECT gets the reply before anyone else
            let msg = match shared.take_receipt_waiter().await {
                Some(waiter) => match waiter.send(msg) {
                    Ok(()) => return Ok(true),
                    Err(msg) => msg,
                },
                None => msg,
            };
            tokio::select! {
                _ = shutdown.recv() => Ok(false),
                _ = conn_tx.send(MessageData::from_frame(msg)) => Ok(true),
            }
        }
        other => Err(ConnError::Protocol(format!(
            "unexpected {} frame from broker",
            other
        ))),
    }
}
