use crate::source::SourceId;

/// Result alias that carries the custom [`EngineError`] type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Common error type for the engine crate.
///
/// The first four variants form the engine's recovery taxonomy. None of them
/// is allowed to stop audio: callers either fall back to a degraded route or
/// drop the request.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The audio subsystem could not be opened. Playback continues on the
    /// direct source to output route with every DSP stage bypassed.
    #[error("audio engine unavailable: {0}")]
    EngineUnavailable(String),
    /// The source is already owned by a different processing context.
    #[error("source {source_id} is bound to an incompatible processing context")]
    SourceBindAmbiguous { source_id: SourceId },
    /// A crossfade was requested while another one is still running.
    #[error("a crossfade is already in progress")]
    CrossfadeBusy,
    /// No genre profile exists for the requested tag.
    #[error("no genre profile for `{genre}`")]
    AutomationTargetInvalid { genre: String },
    /// Caller supplied arguments the engine cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// A track locator could not be turned into a playable source.
    #[error("failed to load source: {0}")]
    SourceLoad(String),
    #[error("{0}")]
    Message(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Wav(#[from] hound::Error),
    #[error("fft failure: {0}")]
    Fft(#[from] realfft::FftError),
}

impl EngineError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for EngineError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for EngineError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
