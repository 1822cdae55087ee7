//! Controller channel handler (spec §4.8 item 3): line-based text
//! commands, binary `ME_FD`/`MR_OD` responses, and the video-relay
//! subscription toggle.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};

use crate::access::AccessCache;
use crate::fanout::FanOut;
use crate::frame_bus::FrameBus;
use crate::repository::Repository;
use crate::types::AuthorityLevel;
use crate::video_relay;
use crate::wire::controller_text::{self, ControllerCommand};

use super::COMMAND_TIMEOUT;

#[derive(Clone)]
pub struct ControllerChannel {
    pub access_cache: AccessCache,
    pub repository: Arc<dyn Repository>,
    pub fanout: Arc<FanOut>,
    pub frame_bus: FrameBus,
    pub relay_socket: Arc<UdpSocket>,
    pub relay_port: u16,
}

#[tracing::instrument(skip(stream, channel))]
pub async fn run(stream: TcpStream, channel: ControllerChannel) {
    let Ok(peer) = stream.peer_addr() else {
        tracing::warn!("controller connection with no peer address; dropping");
        return;
    };
    let relay_peer = SocketAddr::new(peer.ip(), channel.relay_port);
    let relay = video_relay::spawn_session(channel.frame_bus.clone(), channel.relay_socket.clone(), relay_peer);

    let (session_id, mut outbound) = channel.fanout.controller_sessions.register();
    let (read_half, mut write_half) = stream.into_split();

    let writer = tokio::spawn(async move {
        while let Some(bytes) = outbound.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
    });

    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, handle_line(&channel, &relay, &line)).await {
            Ok(Some(response)) => {
                log_interaction(&channel, &line, &response).await;
                channel.fanout.controller_sessions.send_to(session_id, response);
            }
            Ok(None) => {}
            Err(_) => tracing::warn!(session_id, "controller command handling timed out"),
        }
    }

    channel.fanout.controller_sessions.remove(session_id);
    writer.abort();
}

async fn log_interaction(channel: &ControllerChannel, request: &str, response: &Bytes) {
    let response_text = String::from_utf8_lossy(response).into_owned();
    let fut = channel.repository.log_interaction("controller", request, &response_text, chrono::Utc::now());
    if let Err(err) = tokio::time::timeout(crate::repository::DB_TIMEOUT, fut).await {
        tracing::warn!(?err, "interaction log timed out");
    }
}

async fn handle_line(
    channel: &ControllerChannel,
    relay: &video_relay::RelaySubscription,
    line: &str,
) -> Option<Bytes> {
    let command = match controller_text::parse_command(line) {
        Ok(command) => command,
        Err(err) => {
            tracing::warn!(?err, line, "malformed controller command");
            return None;
        }
    };

    let response = match command {
        ControllerCommand::ReadAuth => {
            let snapshot = channel.access_cache.snapshot();
            let mut levels = [AuthorityLevel::AuthOnly.as_u8(); 8];
            for (slot, area_id) in levels.iter_mut().zip(1u8..=8) {
                *slot = snapshot.get(&area_id).copied().unwrap_or(AuthorityLevel::AuthOnly).as_u8();
            }
            controller_text::read_auth_ok(&levels)
        }
        ControllerCommand::WriteAuth(levels) => handle_write_auth(channel, levels).await,
        ControllerCommand::SubscribeCctvA => {
            relay.set(Some('A'));
            controller_text::subscribe_ok(ControllerCommand::SubscribeCctvA)
        }
        ControllerCommand::SubscribeCctvB => {
            relay.set(Some('B'));
            controller_text::subscribe_ok(ControllerCommand::SubscribeCctvB)
        }
        ControllerCommand::MapView => controller_text::subscribe_ok(ControllerCommand::MapView),
        ControllerCommand::ObjectDetail(object_id) => {
            return Some(handle_object_detail(channel, object_id));
        }
    };

    Some(Bytes::from(response))
}

async fn handle_write_auth(channel: &ControllerChannel, levels: [u8; 8]) -> String {
    let mut map = HashMap::with_capacity(8);
    for (area_id, level) in (1u8..=8).zip(levels) {
        let Some(level) = AuthorityLevel::from_u8(level) else {
            return controller_text::write_auth_error();
        };
        map.insert(area_id, level);
    }

    let fut = channel.repository.update_access_conditions(&map);
    match tokio::time::timeout(crate::repository::DB_TIMEOUT, fut).await {
        Ok(Ok(())) => {
            channel.access_cache.load(&map);
            controller_text::write_auth_ok()
        }
        Ok(Err(err)) => {
            tracing::error!(?err, "failed to persist access conditions");
            controller_text::write_auth_error()
        }
        Err(_) => {
            tracing::error!("access condition write timed out");
            controller_text::write_auth_error()
        }
    }
}

fn handle_object_detail(channel: &ControllerChannel, object_id: u64) -> Bytes {
    let Some(detail) = channel.fanout.object_detail(object_id) else {
        return Bytes::from(controller_text::object_detail_err("NOT_FOUND"));
    };

    let header = controller_text::object_detail_ok(
        object_id,
        detail.class,
        &detail.area_name,
        &detail.timestamp.to_rfc3339(),
        detail.image.len(),
    );

    let mut frame = Vec::with_capacity(header.len() + detail.image.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&detail.image);
    Bytes::from(frame)
}
