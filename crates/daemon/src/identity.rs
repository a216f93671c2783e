//! Stream identity and request value types
//!
//! A [`StreamIdentity`] keys every job in the registry: one camera endpoint,
//! one channel, one quality profile.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File name of the HLS playlist written for every stream
pub const PLAYLIST_FILE_NAME: &str = "realplay.m3u8";

/// Camera quality variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    Main,
    Sub,
}

impl Profile {
    /// Zero-based index used in output paths and channel routes
    pub fn index(self) -> u32 {
        match self {
            Profile::Main => 0,
            Profile::Sub => 1,
        }
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "main" | "0" => Ok(Profile::Main),
            "sub" | "1" => Ok(Profile::Sub),
            other => Err(format!("unknown profile '{}'", other)),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Main => write!(f, "main"),
            Profile::Sub => write!(f, "sub"),
        }
    }
}

/// Key of a transcode job. Host comparison ignores ASCII case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamIdentity {
    pub host: String,
    pub port: u16,
    pub channel: u32,
    pub profile: Profile,
}

impl StreamIdentity {
    pub fn new(host: impl Into<String>, port: u16, channel: u32, profile: Profile) -> Self {
        Self {
            host: host.into(),
            port,
            channel,
            profile,
        }
    }

    /// Channel route on the camera, e.g. `/Streaming/Channels/102` for channel 1 sub stream
    pub fn route(&self) -> String {
        format!(
            "/Streaming/Channels/{}0{}",
            self.channel,
            self.profile.index() + 1
        )
    }

    /// Directory holding this stream's playlist and segments
    pub fn output_dir(&self, base_dir: &Path) -> PathBuf {
        base_dir
            .join(self.channel.to_string())
            .join(self.profile.index().to_string())
    }

    /// `<base_dir>/<channel>/<profile index>/realplay.m3u8`
    pub fn output_path(&self, base_dir: &Path) -> PathBuf {
        self.output_dir(base_dir).join(PLAYLIST_FILE_NAME)
    }
}

impl PartialEq for StreamIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.host.eq_ignore_ascii_case(&other.host)
            && self.port == other.port
            && self.channel == other.channel
            && self.profile == other.profile
    }
}

impl Eq for StreamIdentity {}

impl Hash for StreamIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.host.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
        state.write_u8(0xff);
        self.port.hash(state);
        self.channel.hash(state);
        self.profile.hash(state);
    }
}

impl fmt::Display for StreamIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{}0{}",
            self.host,
            self.port,
            self.channel,
            self.profile.index() + 1
        )
    }
}

/// Output frame size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Camera login, stored raw and percent-encoded only when embedded in a URI
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;
    use std::collections::HashSet;

    fn hash_of(identity: &StreamIdentity) -> u64 {
        let mut hasher = DefaultHasher::new();
        identity.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn test_host_comparison_ignores_case() {
        let a = StreamIdentity::new("Camera-01.Local", 554, 1, Profile::Sub);
        let b = StreamIdentity::new("camera-01.local", 554, 1, Profile::Sub);

        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
    }

    #[test]
    fn test_identity_fields_distinguish() {
        let base = StreamIdentity::new("10.0.0.5", 554, 1, Profile::Main);

        assert_ne!(base, StreamIdentity::new("10.0.0.5", 8554, 1, Profile::Main));
        assert_ne!(base, StreamIdentity::new("10.0.0.5", 554, 2, Profile::Main));
        assert_ne!(base, StreamIdentity::new("10.0.0.5", 554, 1, Profile::Sub));
        assert_ne!(base, StreamIdentity::new("10.0.0.6", 554, 1, Profile::Main));
    }

    #[test]
    fn test_route_and_display() {
        let identity = StreamIdentity::new("10.0.0.5", 554, 3, Profile::Sub);

        assert_eq!(identity.route(), "/Streaming/Channels/302");
        assert_eq!(identity.to_string(), "10.0.0.5:554/302");
    }

    #[test]
    fn test_output_path_layout() {
        let identity = StreamIdentity::new("10.0.0.5", 554, 4, Profile::Main);
        let path = identity.output_path(Path::new("/srv/hls"));

        assert_eq!(path, PathBuf::from("/srv/hls/4/0/realplay.m3u8"));
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!("Main".parse::<Profile>(), Ok(Profile::Main));
        assert_eq!("1".parse::<Profile>(), Ok(Profile::Sub));
        assert!("high".parse::<Profile>().is_err());
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::new("admin", "hunter2");
        let rendered = format!("{:?}", creds);

        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }
}
