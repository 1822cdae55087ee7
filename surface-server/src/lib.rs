//! Airport surface-safety main server: mediates detection events from
//! edge vision workers into zone state, access-control decisions, and a
//! multi-client protocol fabric for controller and pilot clients.

pub mod access;
pub mod config;
pub mod coords;
pub mod detection_buffer;
pub mod dispatcher;
pub mod fanout;
pub mod frame_bus;
pub mod lifecycle;
pub mod pipeline;
pub mod repository;
pub mod types;
pub mod video_relay;
pub mod wire;
pub mod zones;
