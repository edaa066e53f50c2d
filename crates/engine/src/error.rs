use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {}: {message}", path.display())]
    Malformed { path: PathBuf, message: String },
}

#[derive(Debug, thiserror::Error)]
#[error("failed to upload {width}x{height} texture: {message}")]
pub struct UploadError {
    pub width: u32,
    pub height: u32,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DrawError {
    #[error("animated content {} failed: {message}", path.display())]
    Animated { path: PathBuf, message: String },
    #[error("surface error: {0}")]
    Surface(String),
}
