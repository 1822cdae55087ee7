//! Wire protocol fabric: the controller text grammar, the pilot/inference/
//! bird-risk JSON shapes, and the UDP frame formats (spec §6).

pub mod controller_text;
pub mod json;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed command line: {0}")]
    MalformedLine(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
}
