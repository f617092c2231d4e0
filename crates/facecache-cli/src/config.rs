use std::path::PathBuf;

pub const DEFAULT_VALIDATION_URL: &str = "http://localhost:3001/api/v1/checkValidation";

/// CLI configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the SCRFD and ArcFace ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum Euclidean embedding distance accepted as a match.
    pub tolerance: f32,
    /// Endpoint of the validation lookup for recognized names.
    pub validation_url: String,
    /// Factor frames are resized by before detection (boxes are scaled back).
    pub frame_scale: f32,
}

impl Config {
    /// Load configuration from `FACECACHE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str, default: f32| {
            var(key)
                .and_then(|v| v.parse::<f32>().ok())
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(default)
        };

        Self {
            model_dir: var("FACECACHE_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(facecache_core::default_model_dir),
            tolerance: parsed("FACECACHE_TOLERANCE", facecache_core::DEFAULT_TOLERANCE),
            validation_url: var("FACECACHE_VALIDATION_URL")
                .unwrap_or_else(|| DEFAULT_VALIDATION_URL.to_string()),
            frame_scale: parsed("FACECACHE_FRAME_SCALE", 0.25).min(1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_with(&[]);
        assert_eq!(config.tolerance, facecache_core::DEFAULT_TOLERANCE);
        assert_eq!(config.frame_scale, 0.25);
        assert_eq!(config.validation_url, DEFAULT_VALIDATION_URL);
        assert!(config.model_dir.ends_with("facecache/models"));
    }

    #[test]
    fn test_overrides() {
        let config = config_with(&[
            ("FACECACHE_MODEL_DIR", "/opt/models"),
            ("FACECACHE_TOLERANCE", "0.6"),
            ("FACECACHE_FRAME_SCALE", "0.5"),
            ("FACECACHE_VALIDATION_URL", "http://example.test/check"),
        ]);
        assert_eq!(config.model_dir, PathBuf::from("/opt/models"));
        assert_eq!(config.tolerance, 0.6);
        assert_eq!(config.frame_scale, 0.5);
        assert_eq!(config.validation_url, "http://example.test/check");
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config_with(&[
            ("FACECACHE_TOLERANCE", "abc"),
            ("FACECACHE_FRAME_SCALE", "-1"),
        ]);
        assert_eq!(config.tolerance, facecache_core::DEFAULT_TOLERANCE);
        assert_eq!(config.frame_scale, 0.25);
        assert_eq!(config_with(&[("FACECACHE_FRAME_SCALE", "4")]).frame_scale, 1.0);
    }
}
