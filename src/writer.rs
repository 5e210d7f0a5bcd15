//! The writer task: sole owner of the transport's write half.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures::SinkExt;
use tokio::io::AsyncWrite;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::codec::FramedWrite;
use tracing::{debug, trace, warn};

use crate::codec::{StompCodec, StompItem};
use crate::config::Direction;
use crate::connection::Shared;
use crate::error::ConnError;
use crate::frame::Frame;

/// Completion signal for one queued write.
pub type WriteDone = oneshot::Receiver<Result<(), ConnError>>;

/// One entry on the outbound queue.
#[derive(Debug)]
pub struct WriteRequest {
    item: StompItem,
    done: Option<oneshot::Sender<Result<(), ConnError>>>,
}

impl WriteRequest {
    /// A frame whose write result is reported on the returned receiver.
    pub fn frame(frame: Frame) -> (Self, WriteDone) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                item: StompItem::Frame(frame),
                done: Some(tx),
            },
            rx,
        )
    }

    /// A fire-and-forget heart-beat.
    pub fn heartbeat() -> Self {
        Self {
            item: StompItem::Heartbeat,
            done: None,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self.item, StompItem::Heartbeat)
    }

    pub(crate) fn into_parts(self) -> (StompItem, Option<oneshot::Sender<Result<(), ConnError>>>) {
        (self.item, self.done)
    }
}

/// Queue `frame` on `outbound` and wait for the writer to report on it.
pub(crate) async fn write_and_wait(
    outbound: &mpsc::Sender<WriteRequest>,
    frame: Frame,
) -> Result<(), ConnError> {
    let (req, done) = WriteRequest::frame(frame);
    outbound
        .send(req)
        .await
        .map_err(|_| ConnError::WriterClosed)?;
    done.await.map_err(|_| ConnError::WriterClosed)?
}

/// Drain `rx` onto `sink` until shutdown, the queue closes, or the
/// transport fails.
pub(crate) async fn run<W>(
    mut sink: FramedWrite<W, StompCodec>,
    mut rx: mpsc::Receiver<WriteRequest>,
    shared: Arc<Shared>,
    mut shutdown: broadcast::Receiver<()>,
) where
    W: AsyncWrite + Unpin,
{
    debug!("writer started");
    loop {
        let req = tokio::select! {
            _ = shutdown.recv() => break,
            req = rx.recv() => match req {
                Some(req) => req,
                None => break,
            },
        };

        if let Some(protocol) = shared.protocol.get() {
            sink.encoder_mut().set_protocol(*protocol);
        }

        let heartbeat = req.is_heartbeat();
        let (item, done) = req.into_parts();
        let result = write_one(&mut sink, &shared, item).await;
        let broken = matches!(result, Err(ConnError::Io(_)));

        match &result {
            Ok(()) => {
                if !heartbeat {
                    shared.stats.frames_written.fetch_add(1, Ordering::Relaxed);
                }
                if let Some(hb) = shared.heartbeat.get() {
                    hb.record_send(heartbeat);
                }
            }
            Err(e) => warn!(error = %e, heartbeat, "write failed"),
        }

        if let Some(done) = done {
            let _ = done.send(result);
        }
        if broken {
            break;
        }
    }
    let _ = sink.close().await;
    debug!("writer stopped");
}

async fn write_one<W>(
    sink: &mut FramedWrite<W, StompCodec>,
    shared: &Shared,
    item: StompItem,
) -> Result<(), ConnError>
where
    W: AsyncWrite + Unpin,
{
    if let StompItem::Frame(f) = &item {
        trace!(command = %f.command, "writing frame");
    }
    let deadlines = &shared.options.deadlines;
    match deadlines.write {
        Some(limit) => match timeout(limit, sink.send(item)).await {
            Ok(result) => result,
            Err(_) => {
                let err = ConnError::WriteDeadline;
                warn!(?limit, "write deadline expired");
                deadlines.notify(&err, Direction::Write);
                Err(err)
            }
        },
        None => sink.send(item).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_requests_have_no_completion() {
        let hb = WriteRequest::heartbeat();
        assert!(hb.is_heartbeat());
        assert!(hb.done.is_none());

        let (req, _done) = WriteRequest::frame(Frame::new("SEND"));
        assert!(!req.is_heartbeat());
        assert!(req.done.is_some());
    }

    #[tokio::test]
    async fn closed_queue_reports_writer_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = write_and_wait(&tx, Frame::new("SEND")).await.unwrap_err();
        assert!(matches!(err, ConnError::WriterClosed));
    }
}
