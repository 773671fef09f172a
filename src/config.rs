use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

/// Read-only access to the media items the user picks in the picker UI.
pub const PICKER_READONLY_SCOPE: &str =
    "https://www.googleapis.com/auth/photospicker.mediaitems.readonly";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// OAuth client and token cache locations.
    pub credentials: CredentialsConfig,
    /// Picker service endpoint and polling budget.
    pub picker: PickerConfig,
    /// Where selected media lands on disk.
    pub media: MediaConfig,
    /// Display surface and crossfade timing.
    pub slideshow: SlideshowConfig,
    /// How the picker link is shown to the user.
    pub qr: QrConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct CredentialsConfig {
    /// Installed-app client JSON downloaded from the cloud console.
    pub client_secrets: PathBuf,
    /// Persisted access/refresh token.
    pub token_cache: PathBuf,
    /// Loopback port for the consent redirect.
    pub redirect_port: u16,
    pub scopes: Vec<String>,
    /// Tokens expiring within this window are treated as already expired.
    #[serde(with = "humantime_serde")]
    pub expiry_skew: Duration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct PickerConfig {
    pub api_base_url: String,
    /// Fixed delay between session status polls.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Wall-clock budget for the user to finish picking.
    #[serde(with = "humantime_serde")]
    pub poll_timeout: Duration,
    /// Per-request HTTP timeout.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Keep both: later items get a ` (n)` suffix before the extension.
    Rename,
    /// Later items replace earlier ones.
    Overwrite,
    /// Later items are reported as failed and not written.
    Skip,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct MediaConfig {
    pub storage_dir: PathBuf,
    /// Appended to a media item's base URL to request the original bytes.
    pub download_suffix: String,
    /// Applies to repeated filenames within one selection.
    pub on_duplicate: DuplicatePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScalingPolicy {
    /// Preserve aspect ratio, centre the image and fill the rest with the background.
    Letterbox,
    /// Resize to exactly the surface dimensions.
    Stretch,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SlideshowConfig {
    pub width: u32,
    pub height: u32,
    /// Rendered frames per crossfade; the per-frame step is `1 / transition-steps`.
    pub transition_steps: u32,
    #[serde(with = "humantime_serde")]
    pub frame_interval: Duration,
    /// How long a fully transitioned image stays on screen.
    #[serde(with = "humantime_serde")]
    pub dwell: Duration,
    pub scaling: ScalingPolicy,
    pub background: [u8; 3],
    /// Lowercase extensions without the dot.
    pub extensions: Vec<String>,
    pub fullscreen: bool,
    pub exit_key: char,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct QrConfig {
    /// Optional PNG written with the picker link.
    pub output_path: Option<PathBuf>,
    /// Print the code to stdout as Unicode blocks.
    pub terminal: bool,
}

impl Configuration {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        serde_yaml::from_str(&s)
            .with_context(|| format!("failed to parse config at {}", path.display()))
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(mut self) -> Result<Self> {
        ensure!(
            !self.picker.poll_interval.is_zero(),
            "picker.poll-interval must be greater than zero"
        );
        ensure!(
            self.picker.poll_interval <= self.picker.poll_timeout,
            "picker.poll-interval must not exceed picker.poll-timeout"
        );
        ensure!(
            !self.picker.api_base_url.trim().is_empty(),
            "picker.api-base-url must not be empty"
        );
        ensure!(
            !self.media.download_suffix.is_empty(),
            "media.download-suffix must not be empty"
        );
        self.slideshow
            .validate()
            .context("invalid slideshow configuration")?;
        self.picker.api_base_url = self.picker.api_base_url.trim_end_matches('/').to_string();
        for ext in &mut self.slideshow.extensions {
            *ext = ext.trim_start_matches('.').to_ascii_lowercase();
        }
        Ok(self)
    }
}

impl SlideshowConfig {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.width > 0 && self.height > 0,
            "width and height must be greater than zero"
        );
        ensure!(
            self.transition_steps > 0,
            "transition-steps must be greater than zero"
        );
        ensure!(
            !self.frame_interval.is_zero(),
            "frame-interval must be greater than zero"
        );
        ensure!(
            !self.extensions.is_empty(),
            "extensions must list at least one file type"
        );
        Ok(())
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            client_secrets: PathBuf::from("Credentials.json"),
            token_cache: PathBuf::from("token.json"),
            redirect_port: 8080,
            scopes: vec![PICKER_READONLY_SCOPE.to_string()],
            expiry_skew: Duration::from_secs(60),
        }
    }
}

impl Default for PickerConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://photospicker.googleapis.com/v1".to_string(),
            poll_interval: Duration::from_secs(5),
            poll_timeout: Duration::from_secs(2000),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("images"),
            download_suffix: "=d".to_string(),
            on_duplicate: DuplicatePolicy::Rename,
        }
    }
}

impl Default for SlideshowConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            transition_steps: 100,
            frame_interval: Duration::from_millis(10),
            dwell: Duration::from_secs(5),
            scaling: ScalingPolicy::Letterbox,
            background: [0, 0, 0],
            extensions: ["jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            fullscreen: false,
            exit_key: 'q',
        }
    }
}

impl Default for QrConfig {
    fn default() -> Self {
        Self {
            output_path: None,
            terminal: true,
        }
    }
}
