pub mod audio_session;
pub mod capture_source;
pub mod compressed_encoder;
pub mod session_delegate;
pub mod sink;
