//! Transcoder command assembly
//!
//! Turns an [`EncodeConfiguration`] into the ordered argument list handed to
//! the transcoder. Optional segments are emitted only when their field is set.

use crate::encode::settings::EncodeConfiguration;
use std::fmt;
use thiserror::Error;

/// Error type for command assembly
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssembleError {
    #[error("host is null")]
    MissingHost,
}

/// Assembled transcoder arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeArgs(Vec<String>);

impl TranscodeArgs {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }

    /// Space-joined form with URI credentials masked, for logging
    pub fn redacted(&self) -> String {
        self.0
            .iter()
            .map(|arg| match arg.strip_prefix("rtsp://").and_then(|rest| rest.rsplit_once('@')) {
                Some((_, host)) => format!("rtsp://***@{}", host),
                None => arg.clone(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for TranscodeArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

/// Source URI with percent-encoded credentials embedded
pub fn source_uri(cfg: &EncodeConfiguration) -> String {
    let source = &cfg.source;
    match &cfg.credentials {
        Some(creds) => format!(
            "rtsp://{}:{}@{}:{}{}",
            urlencoding::encode(&creds.username),
            urlencoding::encode(&creds.password),
            source.host,
            source.port,
            source.route()
        ),
        None => format!("rtsp://{}:{}{}", source.host, source.port, source.route()),
    }
}

/// Build the transcoder arguments for a configuration
///
/// Order is fixed: transport, hwaccel hint, decoder, input, resolution,
/// forced keyframes, vsync, encoder, segment options, output.
pub fn build_transcode_args(cfg: &EncodeConfiguration) -> Result<TranscodeArgs, AssembleError> {
    if cfg.source.host.trim().is_empty() {
        return Err(AssembleError::MissingHost);
    }

    let mut args: Vec<String> = Vec::new();
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    push(&["-rtsp_transport", "tcp"]);
    push(&["-hwaccel", "auto"]);

    if let Some(decode) = &cfg.decode {
        push(&["-c:v", decode.decoder_name()]);
        let options = decode.decoder_options();
        push(&options.iter().map(String::as_str).collect::<Vec<_>>());
    }

    let uri = source_uri(cfg);
    push(&["-i", &uri]);

    if let Some(resolution) = &cfg.resolution {
        push(&["-s", &resolution.to_string()]);
    }

    if let Some(duration) = cfg.segment_duration {
        let expr = format!("expr:gte(t,n_forced*{})", duration);
        push(&["-forced-idr", "1", "-force_key_frames", &expr]);
    }

    push(&["-vsync", "0"]);

    if let Some(encode) = &cfg.encode {
        push(&["-c:v", encode.encoder_name()]);
        let options = encode.encoder_options();
        push(&options.iter().map(String::as_str).collect::<Vec<_>>());
    }

    if let Some(duration) = cfg.segment_duration {
        let duration = duration.to_string();
        push(&["-hls_init_time", &duration, "-hls_time", &duration]);
    }

    if let Some(size) = cfg.segment_list_size {
        push(&["-hls_list_size", &size.to_string(), "-hls_flags", "delete_segments"]);
    }

    if let Some(path) = &cfg.save_path {
        let path = path.to_string_lossy();
        push(&["-f", "hls", &path]);
    }

    Ok(TranscodeArgs(args))
}
