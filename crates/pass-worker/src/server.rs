// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Unix-socket hub: framed requests in, responses and pushes out.

use crate::broker::PortId;
use crate::worker::WorkerContext;
use anyhow::Result;
use pass_session_proto::wire::{decode_frame, encode_frame, frame_len, Frame};
use pass_session_proto::{ConnectionKey, Message, MessageType};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Accepts replicas until the listener fails.
pub async fn serve(ctx: Arc<WorkerContext>, listener: UnixListener) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().await?;
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            if let Err(err) = handle_client(stream, ctx).await {
                warn!(?err, "client handler error");
            }
        });
    }
}

async fn handle_client(stream: UnixStream, ctx: Arc<WorkerContext>) -> Result<()> {
    let (mut reader, writer) = tokio::io::split(stream);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    tokio::spawn(async move {
        let mut ws = writer;
        while let Some(frame) = out_rx.recv().await {
            let packet = match encode_frame(&frame) {
                Ok(packet) => packet,
                Err(err) => {
                    warn!(?err, "failed to encode frame");
                    continue;
                }
            };
            if ws.write_all(&packet).await.is_err() {
                break;
            }
        }
    });

    let mut port: Option<(ConnectionKey, PortId)> = None;
    let mut read_buf: Vec<u8> = vec![0u8; 16 * 1024];
    let mut acc: Vec<u8> = Vec::with_capacity(32 * 1024);
    'conn: loop {
        let n = reader.read(&mut read_buf).await?;
        if n == 0 {
            break;
        }
        acc.extend_from_slice(&read_buf[..n]);

        // process as many frames as available
        loop {
            match frame_len(&acc) {
                Ok(Some(len)) if acc.len() >= len => {}
                Ok(_) => break,
                Err(err) => {
                    warn!(?err, "dropping connection on bad header");
                    break 'conn;
                }
            }
            let (frame, used) = match decode_frame(&acc) {
                Ok(decoded) => decoded,
                Err(err) => {
                    warn!(?err, "failed to decode packet");
                    break 'conn;
                }
            };
            acc.drain(..used);

            let Frame::Request { id, message } = frame else {
                debug!("ignoring non-request frame");
                continue;
            };
            if let Message::WorkerWakeup { tab_id } = &message.message {
                let key = ConnectionKey {
                    endpoint: message.sender,
                    tab_id: *tab_id,
                };
                if port.is_none_or(|(current, _)| current != key) {
                    if let Some((old, old_id)) = port.take() {
                        ctx.broker().disconnect(&old, old_id).await;
                    }
                    port = Some((key, attach(&ctx, key, out_tx.clone()).await));
                }
            }

            if message.message.kind() == MessageType::StoreAction {
                // Inline so one replica's actions keep their order.
                let response = ctx.handle(message).await;
                let _ = out_tx.send(Frame::Response { id, response });
            } else {
                let ctx = Arc::clone(&ctx);
                let out = out_tx.clone();
                tokio::spawn(async move {
                    let response = ctx.handle(message).await;
                    let _ = out.send(Frame::Response { id, response });
                });
            }
        }
    }

    if let Some((key, id)) = port {
        ctx.broker().disconnect(&key, id).await;
    }
    Ok(())
}

/// Registers the connection as a broker port; pushes are forwarded into
/// the connection's frame outbox.
async fn attach(ctx: &WorkerContext, key: ConnectionKey, out: mpsc::UnboundedSender<Frame>) -> PortId {
    let (push_tx, mut push_rx) = mpsc::unbounded_channel::<Message>();
    tokio::spawn(async move {
        while let Some(message) = push_rx.recv().await {
            if out.send(Frame::Push(message)).is_err() {
                break;
            }
        }
    });
    ctx.broker().connect(key, push_tx).await
}
