use anyhow::{bail, Context, Result};
use rollcall_core::ledger::DEFAULT_LEDGER_FILE;
use rollcall_core::DEFAULT_MATCH_TOLERANCE;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file read from the working directory when `ROLLCALL_CONFIG` is unset.
const DEFAULT_CONFIG_FILE: &str = "rollcall.toml";

/// CLI configuration: defaults, then an optional TOML file, then `ROLLCALL_*`
/// environment variables. Command-line flags are applied last by `main`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory of reference photos, one person per file.
    pub known_faces_dir: PathBuf,
    /// Attendance CSV file.
    pub attendance_path: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the SCRFD and ArcFace ONNX models.
    pub model_dir: PathBuf,
    /// Maximum embedding distance accepted as a match.
    pub match_tolerance: f32,
    /// Number of frames to discard after opening the camera (AGC/AE settling).
    pub warmup_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            known_faces_dir: PathBuf::from("known_faces"),
            attendance_path: PathBuf::from(DEFAULT_LEDGER_FILE),
            camera_device: "/dev/video0".to_string(),
            model_dir: default_model_dir(),
            match_tolerance: DEFAULT_MATCH_TOLERANCE,
            warmup_frames: 4,
        }
    }
}

impl Config {
    /// Load configuration from `explicit` (or the default file locations) and
    /// the process environment.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let file = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("ROLLCALL_CONFIG").map(PathBuf::from));

        let mut config = match file {
            Some(path) => Self::from_file(&path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reject settings under which nothing could ever be recognized.
    pub fn validate(&self) -> Result<()> {
        if !self.match_tolerance.is_finite() || self.match_tolerance < 0.0 {
            bail!(
                "match_tolerance must be a finite, non-negative distance (got {})",
                self.match_tolerance
            );
        }
        Ok(())
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&text)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Override fields from `ROLLCALL_*` variables. Unparseable numbers are
    /// ignored with a warning.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("ROLLCALL_KNOWN_FACES_DIR") {
            self.known_faces_dir = PathBuf::from(v);
        }
        if let Some(v) = var("ROLLCALL_ATTENDANCE_PATH") {
            self.attendance_path = PathBuf::from(v);
        }
        if let Some(v) = var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = parse_var(&var, "ROLLCALL_MATCH_TOLERANCE") {
            self.match_tolerance = v;
        }
        if let Some(v) = parse_var(&var, "ROLLCALL_WARMUP_FRAMES") {
            self.warmup_frames = v;
        }
    }
}

fn parse_var<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

/// `$XDG_DATA_HOME/rollcall/models`, falling back to `~/.local/share`.
fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall/models")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.known_faces_dir, PathBuf::from("known_faces"));
        assert_eq!(config.attendance_path, PathBuf::from("attendance.csv"));
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.match_tolerance, DEFAULT_MATCH_TOLERANCE);
        assert!(config.model_dir.ends_with("rollcall/models"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            known_faces_dir = "/srv/faces"
            match_tolerance = 0.9
            "#,
        )
        .unwrap();
        assert_eq!(config.known_faces_dir, PathBuf::from("/srv/faces"));
        assert_eq!(config.match_tolerance, 0.9);
        assert_eq!(config.attendance_path, PathBuf::from("attendance.csv"));
    }

    #[test]
    fn test_unknown_toml_key_is_rejected() {
        assert!(toml::from_str::<Config>("camera = \"/dev/video1\"").is_err());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config {
            camera_device: "/dev/video1".into(),
            ..Config::default()
        };
        config.apply_env(env(&[
            ("ROLLCALL_CAMERA_DEVICE", "/dev/video4"),
            ("ROLLCALL_MATCH_TOLERANCE", "0.75"),
            ("ROLLCALL_WARMUP_FRAMES", "0"),
        ]));
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.match_tolerance, 0.75);
        assert_eq!(config.warmup_frames, 0);
    }

    #[test]
    fn test_bad_env_number_is_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[("ROLLCALL_MATCH_TOLERANCE", "loose")]));
        assert_eq!(config.match_tolerance, DEFAULT_MATCH_TOLERANCE);
    }

    #[test]
    fn test_from_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("rollcall.toml");
        std::fs::write(&path, "attendance_path = \"logs/a.csv\"\nwarmup_frames = 10\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.attendance_path, PathBuf::from("logs/a.csv"));
        assert_eq!(config.warmup_frames, 10);
    }

    #[test]
    fn test_validate_rejects_unusable_tolerance() {
        for bad in [f32::NAN, f32::INFINITY, -0.5] {
            let config = Config {
                match_tolerance: bad,
                ..Config::default()
            };
            assert!(config.validate().is_err(), "tolerance {bad} accepted");
        }
        let zero = Config {
            match_tolerance: 0.0,
            ..Config::default()
        };
        assert!(zero.validate().is_ok());
    }

    #[test]
    fn test_load_rejects_negative_tolerance_in_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("rollcall.toml");
        std::fs::write(&path, "match_tolerance = -1.0\n").unwrap();
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("match_tolerance"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(Config::load(Some(&tmp.path().join("absent.toml"))).is_err());
    }
}
