//! Core configuration structures and loading logic

use serde::{Deserialize, Deserializer, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Configuration parsed but is not usable
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Validation(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// The four parallel directory lists. Index `i` of each list forms one directory pair.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct DirectoriesConfig {
    /// Directories watched for newly arrived media
    #[serde(default)]
    pub source: Vec<PathBuf>,
    /// Directories receiving encoded output
    #[serde(default)]
    pub encoded: Vec<PathBuf>,
    /// Media-server directories the encoded output is published into
    #[serde(default)]
    pub publish: Vec<PathBuf>,
    /// Library section ids refreshed after publishing
    #[serde(default, deserialize_with = "deserialize_sections")]
    pub sections: Vec<String>,
}

/// Section ids may be written as TOML strings or integers.
fn deserialize_sections<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum SectionId {
        Number(u64),
        Text(String),
    }

    let raw: Vec<SectionId> = Vec::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|id| match id {
            SectionId::Number(n) => n.to_string(),
            SectionId::Text(s) => s.trim().to_string(),
        })
        .collect())
}

/// Media server (Plex) connection details
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlexConfig {
    /// Base URL of the server, e.g. `http://127.0.0.1:32400`
    #[serde(default = "default_plex_url")]
    pub url: String,
    /// X-Plex-Token used to authenticate section refreshes
    #[serde(default)]
    pub token: String,
}

fn default_plex_url() -> String {
    "http://127.0.0.1:32400".to_string()
}

impl Default for PlexConfig {
    fn default() -> Self {
        Self {
            url: default_plex_url(),
            token: String::new(),
        }
    }
}

/// Main loop and persisted state settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// Seconds to sleep after a pass that found no work (default 30 minutes)
    #[serde(default = "default_idle_sleep_secs")]
    pub idle_sleep_secs: u64,
    /// Directory holding the crash marker and probe artifacts
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Log file; logs go to stderr when unset
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Consecutive transcode failures before a source is dead-lettered (0 = never)
    #[serde(default)]
    pub max_failures: u32,
    /// Upper bound on a single transcode in seconds (0 = unbounded)
    #[serde(default)]
    pub transcode_timeout_secs: u64,
}

fn default_idle_sleep_secs() -> u64 {
    1800
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/tmp/auto-encode")
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            idle_sleep_secs: default_idle_sleep_secs(),
            state_dir: default_state_dir(),
            log_file: None,
            max_failures: 0,
            transcode_timeout_secs: 0,
        }
    }
}

impl DaemonConfig {
    /// Location of the crash recovery marker
    pub fn marker_path(&self) -> PathBuf {
        self.state_dir.join("in_progress.txt")
    }

    /// Directory where probe reports are materialised
    pub fn probe_dir(&self) -> PathBuf {
        self.state_dir.join("probe")
    }
}

/// File readiness thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReadinessConfig {
    /// Seconds between the two size observations
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
    /// Minimum seconds since last modification
    #[serde(default = "default_min_age_secs")]
    pub min_age_secs: u64,
}

fn default_settle_secs() -> u64 {
    10
}

fn default_min_age_secs() -> u64 {
    60
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            settle_secs: default_settle_secs(),
            min_age_secs: default_min_age_secs(),
        }
    }
}

/// Encoder binaries and target quality profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncodeConfig {
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,
    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    /// CRF for sources 2000 lines and taller
    #[serde(default = "default_crf_uhd")]
    pub crf_uhd: u8,
    /// CRF for sources 700 lines and taller
    #[serde(default = "default_crf_hd")]
    pub crf_hd: u8,
    /// CRF for everything smaller
    #[serde(default = "default_crf_sd")]
    pub crf_sd: u8,
    /// Codec lossless audio tracks are re-encoded to
    #[serde(default = "default_lossless_audio_codec")]
    pub lossless_audio_codec: String,
    #[serde(default = "default_lossless_audio_bitrate")]
    pub lossless_audio_bitrate: String,
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_video_codec() -> String {
    "libx265".to_string()
}

fn default_preset() -> String {
    "slow".to_string()
}

fn default_crf_uhd() -> u8 {
    20
}

fn default_crf_hd() -> u8 {
    19
}

fn default_crf_sd() -> u8 {
    18
}

fn default_lossless_audio_codec() -> String {
    "eac3".to_string()
}

fn default_lossless_audio_bitrate() -> String {
    "640k".to_string()
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            video_codec: default_video_codec(),
            preset: default_preset(),
            crf_uhd: default_crf_uhd(),
            crf_hd: default_crf_hd(),
            crf_sd: default_crf_sd(),
            lossless_audio_codec: default_lossless_audio_codec(),
            lossless_audio_bitrate: default_lossless_audio_bitrate(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub directories: DirectoriesConfig,
    #[serde(default)]
    pub plex: PlexConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub encode: EncodeConfig,
}

/// One monitored location: where media arrives, where it is encoded to,
/// where it is published, and which library section to refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryPair {
    /// Position in the configured lists
    pub index: usize,
    pub source: PathBuf,
    pub encoded: PathBuf,
    pub publish: PathBuf,
    pub section: String,
}

/// Directory list lengths when they disagree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthMismatch {
    pub min: usize,
    pub max: usize,
}

/// Directory pairs resolved from the parallel lists
#[derive(Debug, Clone, PartialEq)]
pub struct PairResolution {
    pub pairs: Vec<DirectoryPair>,
    /// Set when the lists had different lengths and were truncated
    pub mismatch: Option<LengthMismatch>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - AUTO_ENCODE_PLEX_URL -> plex.url
    /// - AUTO_ENCODE_PLEX_TOKEN -> plex.token
    /// - AUTO_ENCODE_IDLE_SLEEP_SECS -> daemon.idle_sleep_secs
    /// - AUTO_ENCODE_STATE_DIR -> daemon.state_dir
    /// - AUTO_ENCODE_MAX_FAILURES -> daemon.max_failures
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("AUTO_ENCODE_PLEX_URL") {
            if !val.is_empty() {
                self.plex.url = val;
            }
        }

        if let Ok(val) = env::var("AUTO_ENCODE_PLEX_TOKEN") {
            self.plex.token = val;
        }

        if let Ok(val) = env::var("AUTO_ENCODE_IDLE_SLEEP_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.daemon.idle_sleep_secs = secs;
            }
        }

        if let Ok(val) = env::var("AUTO_ENCODE_STATE_DIR") {
            if !val.is_empty() {
                self.daemon.state_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("AUTO_ENCODE_MAX_FAILURES") {
            if let Ok(n) = val.parse::<u32>() {
                self.daemon.max_failures = n;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Check the values the daemon cannot start without
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plex.url.trim().is_empty() {
            return Err(ConfigError::Validation("plex.url is empty".to_string()));
        }
        self.directory_pairs().map(|_| ())
    }

    /// Zip the four directory lists into directory pairs.
    ///
    /// An empty list is an error. Lists of different lengths are truncated to the
    /// shortest one and the mismatch is reported so the caller can warn about it.
    pub fn directory_pairs(&self) -> Result<PairResolution, ConfigError> {
        let dirs = &self.directories;
        let lengths = [
            ("source", dirs.source.len()),
            ("encoded", dirs.encoded.len()),
            ("publish", dirs.publish.len()),
            ("sections", dirs.sections.len()),
        ];

        if let Some((name, _)) = lengths.iter().find(|(_, len)| *len == 0) {
            return Err(ConfigError::Validation(format!(
                "directories.{} is empty",
                name
            )));
        }

        let min = lengths.iter().map(|(_, len)| *len).min().unwrap_or(0);
        let max = lengths.iter().map(|(_, len)| *len).max().unwrap_or(0);

        let pairs = (0..min)
            .map(|index| DirectoryPair {
                index,
                source: dirs.source[index].clone(),
                encoded: dirs.encoded[index].clone(),
                publish: dirs.publish[index].clone(),
                section: dirs.sections[index].clone(),
            })
            .collect();

        Ok(PairResolution {
            pairs,
            mismatch: (min != max).then_some(LengthMismatch { min, max }),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("AUTO_ENCODE_PLEX_URL");
        env::remove_var("AUTO_ENCODE_PLEX_TOKEN");
        env::remove_var("AUTO_ENCODE_IDLE_SLEEP_SECS");
        env::remove_var("AUTO_ENCODE_STATE_DIR");
        env::remove_var("AUTO_ENCODE_MAX_FAILURES");
    }

    fn config_with_lengths(source: usize, encoded: usize, publish: usize, sections: usize) -> Config {
        Config {
            directories: DirectoriesConfig {
                source: (0..source).map(|i| PathBuf::from(format!("/src/{}", i))).collect(),
                encoded: (0..encoded).map(|i| PathBuf::from(format!("/enc/{}", i))).collect(),
                publish: (0..publish).map(|i| PathBuf::from(format!("/pub/{}", i))).collect(),
                sections: (0..sections).map(|i| i.to_string()).collect(),
            },
            ..Config::default()
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_config_parses_all_sections(
            idle in 0u64..100_000,
            settle in 0u64..600,
            min_age in 0u64..3600,
            max_failures in 0u32..10,
            crf in 0u8..51,
        ) {
            let toml_str = format!(
                r#"
[directories]
source = ["/in/movies"]
encoded = ["/enc/movies"]
publish = ["/plex/movies"]
sections = ["3"]

[plex]
url = "http://plex.local:32400"
token = "abc"

[daemon]
idle_sleep_secs = {}
max_failures = {}

[readiness]
settle_secs = {}
min_age_secs = {}

[encode]
crf_hd = {}
"#,
                idle, max_failures, settle, min_age, crf
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.daemon.idle_sleep_secs, idle);
            prop_assert_eq!(config.daemon.max_failures, max_failures);
            prop_assert_eq!(config.readiness.settle_secs, settle);
            prop_assert_eq!(config.readiness.min_age_secs, min_age);
            prop_assert_eq!(config.encode.crf_hd, crf);
            prop_assert_eq!(config.plex.token.as_str(), "abc");
            prop_assert_eq!(config.directories.sections.clone(), vec!["3".to_string()]);
        }

        // For any list lengths >= 1, the pair count is the shortest length and a
        // mismatch is reported exactly when the lengths differ.
        #[test]
        fn prop_pairs_truncate_to_shortest_list(
            source in 1usize..6,
            encoded in 1usize..6,
            publish in 1usize..6,
            sections in 1usize..6,
        ) {
            let config = config_with_lengths(source, encoded, publish, sections);
            let resolution = config.directory_pairs().expect("non-empty lists resolve");

            let min = source.min(encoded).min(publish).min(sections);
            let max = source.max(encoded).max(publish).max(sections);

            prop_assert_eq!(resolution.pairs.len(), min);
            if min == max {
                prop_assert_eq!(resolution.mismatch, None);
            } else {
                prop_assert_eq!(resolution.mismatch, Some(LengthMismatch { min, max }));
            }

            for (i, pair) in resolution.pairs.iter().enumerate() {
                prop_assert_eq!(pair.index, i);
                prop_assert_eq!(&pair.source, &PathBuf::from(format!("/src/{}", i)));
                prop_assert_eq!(&pair.publish, &PathBuf::from(format!("/pub/{}", i)));
            }
        }

        #[test]
        fn prop_env_overrides_idle_sleep(
            initial in 0u64..10_000,
            override_secs in 0u64..10_000,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[daemon]\nidle_sleep_secs = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("AUTO_ENCODE_IDLE_SLEEP_SECS", override_secs.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.daemon.idle_sleep_secs, override_secs);
        }

        #[test]
        fn prop_env_overrides_max_failures(
            initial in 0u32..10,
            override_n in 0u32..10,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!("[daemon]\nmax_failures = {}\n", initial);
            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("AUTO_ENCODE_MAX_FAILURES", override_n.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.daemon.max_failures, override_n);
        }
    }

    #[test]
    fn test_env_overrides_plex_and_state_dir() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("AUTO_ENCODE_PLEX_URL", "http://10.0.0.5:32400");
        env::set_var("AUTO_ENCODE_PLEX_TOKEN", "secret");
        env::set_var("AUTO_ENCODE_STATE_DIR", "/var/lib/auto-encode");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.plex.url, "http://10.0.0.5:32400");
        assert_eq!(config.plex.token, "secret");
        assert_eq!(config.daemon.state_dir, PathBuf::from("/var/lib/auto-encode"));
        assert_eq!(
            config.daemon.marker_path(),
            PathBuf::from("/var/lib/auto-encode/in_progress.txt")
        );
    }

    #[test]
    fn test_invalid_numeric_override_is_ignored() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("AUTO_ENCODE_IDLE_SLEEP_SECS", "soon");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.daemon.idle_sleep_secs, 1800);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert!(config.directories.source.is_empty());
        assert_eq!(config.plex.url, "http://127.0.0.1:32400");
        assert_eq!(config.daemon.idle_sleep_secs, 1800);
        assert_eq!(config.daemon.state_dir, PathBuf::from("/tmp/auto-encode"));
        assert_eq!(config.daemon.max_failures, 0);
        assert_eq!(config.readiness.settle_secs, 10);
        assert_eq!(config.encode.ffmpeg, PathBuf::from("ffmpeg"));
        assert_eq!(config.encode.video_codec, "libx265");
    }

    #[test]
    fn test_numeric_section_ids() {
        let toml_str = r#"
[directories]
sections = [1, "2", 14]
"#;
        let config = Config::parse_toml(toml_str).expect("Mixed section ids should parse");
        assert_eq!(config.directories.sections, vec!["1", "2", "14"]);
    }

    #[test]
    fn test_empty_directory_list_is_fatal() {
        let config = config_with_lengths(2, 2, 0, 2);
        let err = config.directory_pairs().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("directories.publish"));
    }

    #[test]
    fn test_three_sources_two_encoded_yields_two_pairs() {
        let config = config_with_lengths(3, 2, 3, 3);
        let resolution = config.directory_pairs().unwrap();
        assert_eq!(resolution.pairs.len(), 2);
        assert_eq!(resolution.mismatch, Some(LengthMismatch { min: 2, max: 3 }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_plex_url_is_rejected() {
        let mut config = config_with_lengths(1, 1, 1, 1);
        config.plex.url = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }
}
