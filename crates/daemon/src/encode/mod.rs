//! Encoding modules: vendor settings, codec selection and command assembly

pub mod command;
pub mod selector;
pub mod settings;

pub use command::{build_transcode_args, source_uri, AssembleError, TranscodeArgs};
pub use selector::{apply_selection, ensure_codecs, select_codecs, SelectError, Selection};
pub use settings::{DecodeSettings, EncodeConfiguration, EncodeSettings};
