use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;

use surface_server::access::AccessCache;
use surface_server::config::Config;
use surface_server::coords::{CalibrationStore, Transformer};
use surface_server::detection_buffer::DetectionBuffer;
use surface_server::dispatcher::birdrisk::{self, BirdRiskChannel};
use surface_server::dispatcher::controller::{self, ControllerChannel};
use surface_server::dispatcher::inference::{self, InferenceChannel};
use surface_server::dispatcher::pilot::{self, PilotChannel};
use surface_server::fanout::{AlertedSet, FanOut, SessionRegistry};
use surface_server::frame_bus::FrameBus;
use surface_server::lifecycle;
use surface_server::pipeline::Pipeline;
use surface_server::repository::sqlite::SqliteRepository;
use surface_server::repository::Repository;

/// Fallback pixel dimensions used only when an `object_detected` event
/// arrives for a frame the Frame Bus has already aged out (spec §7: the
/// coordinate transformer still needs *some* frame size to fall back on).
const DEFAULT_FRAME_SIZE: (f64, f64) = (1920.0, 1080.0);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::parse();

    let database_url = if config.db_name == ":memory:" {
        "sqlite::memory:".to_string()
    } else {
        format!("sqlite://{}?mode=rwc", config.db_name)
    };
    let repository: Arc<dyn Repository> = Arc::new(
        SqliteRepository::connect(&database_url)
            .await
            .context("failed to connect to repository")?,
    );

    let areas = repository.get_area_list().await.context("failed to load area list")?;
    let area_ids: Vec<_> = areas.iter().map(|a| a.id).collect();
    let area_names = areas.iter().map(|a| (a.id, a.name.clone())).collect();

    let access_cache = AccessCache::new();
    access_cache.load(&repository.load_access_conditions().await.context("failed to load access conditions")?);

    let alerted = AlertedSet::new();
    alerted.seed(repository.load_alerted_object_ids().await.context("failed to seed alerted set")?);

    let frame_bus = FrameBus::new(config.frame_buffer_size, config.frame_age_cap());
    let calibrations = CalibrationStore::new();
    let transformer =
        Transformer::new(config.map_width, config.map_height, config.real_map_width, config.real_map_height, areas.clone());
    let detection_buffer = DetectionBuffer::new(config.detection_buffer_window_ns());

    let fanout = Arc::new(FanOut {
        controller_sessions: SessionRegistry::new(),
        pilot_sessions: SessionRegistry::new(),
        alerted,
        frame_bus: frame_bus.clone(),
        repository: repository.clone(),
        area_names,
        image_dir: std::path::PathBuf::from(&config.image_dir),
        object_details: parking_lot::Mutex::new(std::collections::HashMap::new()),
        bird_risk: parking_lot::Mutex::new(repository.get_latest_bird_risk().await.context("failed to load bird risk")?),
    });

    std::fs::create_dir_all(&config.image_dir).context("failed to create image directory")?;

    let (pipeline_tx, zone_board) = Pipeline::spawn(
        transformer,
        calibrations.clone(),
        access_cache.clone(),
        &area_ids,
        config.hazard_clear(),
        detection_buffer,
        fanout.clone(),
    );

    spawn_frame_in(frame_bus.clone(), &config).await?;
    spawn_age_out(frame_bus.clone());

    let relay_socket =
        Arc::new(UdpSocket::bind((config.bind_address.as_str(), config.video_relay_port)).await.context("video relay bind")?);

    spawn_inference_listener(&config, calibrations, frame_bus.clone(), pipeline_tx, fanout.clone()).await?;
    spawn_controller_listener(&config, access_cache, repository.clone(), fanout.clone(), frame_bus, relay_socket).await?;
    spawn_birdrisk_listener(&config, repository.clone(), fanout.clone()).await?;
    spawn_pilot_listener(&config, repository, fanout, zone_board, &areas).await?;

    lifecycle::wait_for_shutdown_signal().await;
    tracing::info!(seconds = lifecycle::SHUTDOWN_DRAIN.as_secs(), "draining outbound queues");
    tokio::time::sleep(lifecycle::SHUTDOWN_DRAIN).await;

    Ok(())
}

async fn spawn_frame_in(frame_bus: FrameBus, config: &Config) -> anyhow::Result<()> {
    let socket = UdpSocket::bind((config.bind_address.as_str(), config.frame_in_port))
        .await
        .context("frame-in socket bind")?;
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((n, _)) => frame_bus.ingest_datagram(&buf[..n]),
                Err(err) => tracing::error!(?err, "frame-in socket recv failed"),
            }
        }
    });
    Ok(())
}

fn spawn_age_out(frame_bus: FrameBus) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            ticker.tick().await;
            frame_bus.age_out(surface_server::frame_bus::now_ns());
        }
    });
}

async fn spawn_inference_listener(
    config: &Config,
    calibrations: CalibrationStore,
    frame_bus: FrameBus,
    pipeline_tx: mpsc::Sender<surface_server::pipeline::DetectionTick>,
    fanout: Arc<FanOut>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind((config.bind_address.as_str(), config.inference_port))
        .await
        .context("inference listener bind")?;
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::info!(%peer, "inference worker connected");
                    let channel = InferenceChannel {
                        calibrations: calibrations.clone(),
                        expected_cameras: vec!['A', 'B'],
                        frame_bus: frame_bus.clone(),
                        pipeline_tx: pipeline_tx.clone(),
                        fanout: fanout.clone(),
                        default_frame_size: DEFAULT_FRAME_SIZE,
                    };
                    tokio::spawn(inference::run(stream, channel));
                }
                Err(err) => tracing::error!(?err, "inference listener accept failed"),
            }
        }
    });
    Ok(())
}

async fn spawn_controller_listener(
    config: &Config,
    access_cache: AccessCache,
    repository: Arc<dyn Repository>,
    fanout: Arc<FanOut>,
    frame_bus: FrameBus,
    relay_socket: Arc<UdpSocket>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind((config.bind_address.as_str(), config.controller_port))
        .await
        .context("controller listener bind")?;
    let relay_port = config.video_relay_port;
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::info!(%peer, "controller client connected");
                    let channel = ControllerChannel {
                        access_cache: access_cache.clone(),
                        repository: repository.clone(),
                        fanout: fanout.clone(),
                        frame_bus: frame_bus.clone(),
                        relay_socket: relay_socket.clone(),
                        relay_port,
                    };
                    tokio::spawn(controller::run(stream, channel));
                }
                Err(err) => tracing::error!(?err, "controller listener accept failed"),
            }
        }
    });
    Ok(())
}

async fn spawn_birdrisk_listener(
    config: &Config,
    repository: Arc<dyn Repository>,
    fanout: Arc<FanOut>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind((config.bind_address.as_str(), config.bird_risk_port))
        .await
        .context("bird-risk listener bind")?;
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::info!(%peer, "bird-risk estimator connected");
                    let channel = BirdRiskChannel { repository: repository.clone(), fanout: fanout.clone() };
                    tokio::spawn(birdrisk::run(stream, channel));
                }
                Err(err) => tracing::error!(?err, "bird-risk listener accept failed"),
            }
        }
    });
    Ok(())
}

async fn spawn_pilot_listener(
    config: &Config,
    repository: Arc<dyn Repository>,
    fanout: Arc<FanOut>,
    zone_board: surface_server::zones::ZoneStatusBoard,
    areas: &[surface_server::types::Area],
) -> anyhow::Result<()> {
    let runway_a = lifecycle::find_area_id(areas, "RWY_A");
    let runway_b = lifecycle::find_area_id(areas, "RWY_B");

    let listener =
        TcpListener::bind((config.bind_address.as_str(), config.pilot_port)).await.context("pilot listener bind")?;
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::info!(%peer, "pilot client connected");
                    let channel = PilotChannel {
                        fanout: fanout.clone(),
                        repository: repository.clone(),
                        zone_board: zone_board.clone(),
                        runway_a,
                        runway_b,
                    };
                    tokio::spawn(pilot::run(stream, channel));
                }
                Err(err) => tracing::error!(?err, "pilot listener accept failed"),
            }
        }
    });
    Ok(())
}
