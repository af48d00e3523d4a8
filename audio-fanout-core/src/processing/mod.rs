pub mod amplitude_meter;
pub mod format_converter;
pub mod wav_format;
