use std::time::Duration;

use crate::config::Config;

/// Ceilings applied to a single script execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub timeout: Duration,
    pub max_output_bytes: usize,
    /// Statements plus loop iterations.
    pub max_steps: u64,
    /// Longest list or string `+` and `*` may produce.
    pub max_collection_len: usize,
    pub max_samples_per_call: u64,
    pub max_total_samples: u64,
    /// Binding read when the script does not `return`.
    pub result_binding: String,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_output_bytes: 1024 * 1024,
            max_steps: 10_000_000,
            max_collection_len: 10_000_000,
            max_samples_per_call: 1_000_000,
            max_total_samples: 5_000_000,
            result_binding: "result".to_string(),
        }
    }
}

impl Limits {
    /// Missing or unparsable keys keep their defaults.
    pub fn from_config(cfg: &Config) -> Self {
        let defaults = Self::default();
        let result_binding = cfg
            .get("RESULT_BINDING")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.result_binding);
        Self {
            timeout: cfg
                .get_u64("EXEC_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            max_output_bytes: cfg.get_usize("MAX_OUTPUT_BYTES").unwrap_or(defaults.max_output_bytes),
            max_steps: cfg.get_u64("MAX_STEPS").unwrap_or(defaults.max_steps),
            max_collection_len: cfg
                .get_usize("MAX_COLLECTION_LEN")
                .unwrap_or(defaults.max_collection_len),
            max_samples_per_call: cfg
                .get_u64("MAX_SAMPLES_PER_CALL")
                .unwrap_or(defaults.max_samples_per_call),
            max_total_samples: cfg
                .get_u64("MAX_TOTAL_SAMPLES")
                .unwrap_or(defaults.max_total_samples),
            result_binding,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_defaults() {
        assert_eq!(Limits::from_config(&Config::from_rc_str("")), Limits::default());
    }

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let cfg = Config::from_rc_str("EXEC_TIMEOUT_MS=250\nMAX_STEPS=ten\nRESULT_BINDING=  out \n");
        let limits = Limits::from_config(&cfg);
        assert_eq!(limits.timeout, Duration::from_millis(250));
        assert_eq!(limits.max_steps, 10_000_000);
        assert_eq!(limits.result_binding, "out");
    }
}
