//! Runtime configuration (spec §6 "Configuration").

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Config {
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: String,

    /// UDP: raw camera frames in.
    #[arg(long, env = "FRAME_IN_PORT", default_value_t = 4000)]
    pub frame_in_port: u16,

    /// UDP: video relay out.
    #[arg(long, env = "VIDEO_RELAY_PORT", default_value_t = 4100)]
    pub video_relay_port: u16,

    /// TCP: inference worker control/events.
    #[arg(long, env = "INFERENCE_PORT", default_value_t = 5000)]
    pub inference_port: u16,

    /// TCP: controller GUI protocol.
    #[arg(long, env = "CONTROLLER_PORT", default_value_t = 5100)]
    pub controller_port: u16,

    /// TCP: bird-risk estimator events.
    #[arg(long, env = "BIRD_RISK_PORT", default_value_t = 5200)]
    pub bird_risk_port: u16,

    /// TCP: pilot client protocol.
    #[arg(long, env = "PILOT_PORT", default_value_t = 5300)]
    pub pilot_port: u16,

    #[arg(long, env = "DB_HOST", default_value = "localhost")]
    pub db_host: String,

    #[arg(long, env = "DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    #[arg(long, env = "DB_USER", default_value = "surface_server")]
    pub db_user: String,

    #[arg(long, env = "DB_PASSWORD", default_value = "")]
    pub db_password: String,

    /// SQLite backing file, or ":memory:" for an ephemeral store. The
    /// DB_HOST/PORT/USER/PASSWORD/NAME options above are retained because
    /// spec.md names them as recognised configuration even though this
    /// implementation backs the Repository Façade with SQLite (see
    /// SPEC_FULL.md §4.7a); a future swap to a networked store would wire
    /// those fields into the connection string instead of this path.
    #[arg(long, env = "DB_NAME", default_value = "surface_server.db")]
    pub db_name: String,

    #[arg(long, env = "IMAGE_DIR", default_value = "./images")]
    pub image_dir: String,

    #[arg(long, env = "MAP_WIDTH", default_value_t = 960.0)]
    pub map_width: f64,

    #[arg(long, env = "MAP_HEIGHT", default_value_t = 720.0)]
    pub map_height: f64,

    #[arg(long, env = "REAL_MAP_WIDTH", default_value_t = 1800.0)]
    pub real_map_width: f64,

    #[arg(long, env = "REAL_MAP_HEIGHT", default_value_t = 1350.0)]
    pub real_map_height: f64,

    #[arg(long, env = "FRAME_BUFFER_SIZE", default_value_t = 60)]
    pub frame_buffer_size: usize,

    #[arg(long, env = "FRAME_AGE_CAP_MS", default_value_t = 2000)]
    pub frame_age_cap_ms: u64,

    #[arg(long, env = "DETECTION_BUFFER_WINDOW_MS", default_value_t = 200)]
    pub detection_buffer_window_ms: u64,

    #[arg(long, env = "HAZARD_CLEAR_MS", default_value_t = 2000)]
    pub hazard_clear_ms: u64,

    #[arg(long, env = "TCP_BUFFER_SIZE", default_value_t = 65536)]
    pub tcp_buffer_size: usize,
}

impl Config {
    #[must_use]
    pub fn detection_buffer_window_ns(&self) -> u64 {
        self.detection_buffer_window_ms * 1_000_000
    }

    #[must_use]
    pub fn frame_age_cap(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.frame_age_cap_ms)
    }

    #[must_use]
    pub fn hazard_clear(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.hazard_clear_ms)
    }
}
