//! Pilot channel handler (spec §4.8 item 4): JSON `query_information`
//! commands resolved from in-memory zone/bird-risk state.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::fanout::FanOut;
use crate::repository::Repository;
use crate::types::{AreaId, ZoneStatus};
use crate::wire::json::{PilotCommand, PilotResponse};
use crate::zones::ZoneStatusBoard;

use super::COMMAND_TIMEOUT;

#[derive(Clone)]
pub struct PilotChannel {
    pub fanout: Arc<FanOut>,
    pub repository: Arc<dyn Repository>,
    pub zone_board: ZoneStatusBoard,
    pub runway_a: Option<AreaId>,
    pub runway_b: Option<AreaId>,
}

#[tracing::instrument(skip(stream, channel))]
pub async fn run(stream: TcpStream, channel: PilotChannel) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match tokio::time::timeout(COMMAND_TIMEOUT, handle_line(&channel, &line)).await {
            Ok(response) => response,
            Err(_) => {
                tracing::warn!("pilot command handling timed out");
                PilotResponse::error(String::new())
            }
        };

        let Ok(json) = serde_json::to_string(&response) else { continue };
        log_interaction(&channel, &line, &json).await;

        let mut line_out = json;
        line_out.push('\n');
        if write_half.write_all(line_out.as_bytes()).await.is_err() {
            break;
        }
    }
}

async fn log_interaction(channel: &PilotChannel, request: &str, response: &str) {
    let fut = channel.repository.log_interaction("pilot", request, response, chrono::Utc::now());
    if let Err(err) = tokio::time::timeout(crate::repository::DB_TIMEOUT, fut).await {
        tracing::warn!(?err, "interaction log timed out");
    }
}

async fn handle_line(channel: &PilotChannel, line: &str) -> PilotResponse {
    let command: PilotCommand = match serde_json::from_str(line) {
        Ok(command) => command,
        Err(err) => {
            tracing::warn!(?err, line, "malformed pilot command");
            return PilotResponse::error(String::new());
        }
    };

    let response_code = match command.request_code.as_str() {
        "BR_INQ" => channel
            .fanout
            .latest_bird_risk()
            .and_then(crate::types::BirdRiskLevel::from_u8)
            .map_or("BR_LOW", crate::types::BirdRiskLevel::as_response_code)
            .to_string(),
        "RWY_A_STATUS" => runway_status(zone_status_or_normal(channel, channel.runway_a)),
        "RWY_B_STATUS" => runway_status(zone_status_or_normal(channel, channel.runway_b)),
        "RWY_AVAIL_IN" => runway_availability(
            zone_status_or_normal(channel, channel.runway_a),
            zone_status_or_normal(channel, channel.runway_b),
        ),
        other => {
            tracing::warn!(request_code = other, "unknown pilot request code");
            return PilotResponse::error(command.request_code);
        }
    };

    PilotResponse::success(command.request_code, response_code)
}

fn zone_status_or_normal(channel: &PilotChannel, area_id: Option<AreaId>) -> ZoneStatus {
    area_id.and_then(|id| channel.zone_board.get(id)).unwrap_or(ZoneStatus::Normal)
}

fn runway_status(status: ZoneStatus) -> String {
    match status {
        ZoneStatus::Normal => "CLEAR".to_string(),
        ZoneStatus::Hazard => "BLOCKED".to_string(),
    }
}

fn runway_availability(a: ZoneStatus, b: ZoneStatus) -> String {
    match (a, b) {
        (ZoneStatus::Normal, ZoneStatus::Normal) => "ALL".to_string(),
        (ZoneStatus::Normal, ZoneStatus::Hazard) => "A_ONLY".to_string(),
        (ZoneStatus::Hazard, ZoneStatus::Normal) => "B_ONLY".to_string(),
        (ZoneStatus::Hazard, ZoneStatus::Hazard) => "NONE".to_string(),
    }
}
