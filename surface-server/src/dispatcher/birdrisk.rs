//! Bird-risk channel handler (spec §4.8 item 2): `BR_CHANGED` events are
//! persisted and broadcast as `ME_BR` to controller and pilot sessions.

use std::sync::Arc;

use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::net::TcpStream;

use crate::fanout::FanOut;
use crate::repository::Repository;
use crate::types::BirdRiskLevel;
use crate::wire::json::BirdRiskChanged;

#[derive(Clone)]
pub struct BirdRiskChannel {
    pub fanout: Arc<FanOut>,
    pub repository: Arc<dyn Repository>,
}

#[tracing::instrument(skip(stream, channel))]
pub async fn run(stream: TcpStream, channel: BirdRiskChannel) {
    let mut lines = BufReader::new(stream).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let event: BirdRiskChanged = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!(?err, line, "malformed bird-risk event");
                continue;
            }
        };

        if event.event != "BR_CHANGED" {
            tracing::debug!(event = event.event, "ignoring unrecognised bird-risk event");
            continue;
        }

        let Some(level) = BirdRiskLevel::from_result_code(&event.result) else {
            tracing::warn!(result = event.result, "unrecognised bird-risk level code");
            continue;
        };

        let prev = channel.fanout.latest_bird_risk();
        let now = chrono::Utc::now();
        let fut = channel.repository.append_bird_risk(prev, level.as_u8(), now);
        match tokio::time::timeout(crate::repository::DB_TIMEOUT, fut).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(?err, "failed to persist bird-risk change"),
            Err(_) => tracing::error!("bird-risk persistence timed out"),
        }

        channel.fanout.broadcast_bird_risk(level.as_u8());
    }
}
