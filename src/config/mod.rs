use std::{
    collections::HashMap,
    env, fs,
    io::{BufRead, BufReader},
    path::PathBuf,
};

use directories::BaseDirs;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let mut map = default_map();
        let config_path = default_config_path();

        // Read .oscsimrc if exists
        if config_path.exists() {
            if let Ok(file) = fs::File::open(&config_path) {
                read_rc(BufReader::new(file), &mut map);
            }
        }

        // Overlay environment variables (take precedence)
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(normalize_key(&k), v);
            }
        }

        Self { inner: map, config_path }
    }

    /// Defaults overlaid with rc-file text, ignoring the environment.
    pub fn from_rc_str(text: &str) -> Self {
        let mut map = default_map();
        read_rc(text.as_bytes(), &mut map);
        Self { inner: map, config_path: PathBuf::new() }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse::<usize>().ok())
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(|v| v.parse::<u64>().ok())
    }
}

fn read_rc(reader: impl BufRead, map: &mut HashMap<String, String>) {
    for line in reader.lines().map_while(Result::ok) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(normalize_key(k.trim()), v.trim().to_string());
        }
    }
}

/// `OSCSIM_MAX_STEPS` and `MAX_STEPS` name the same setting.
fn normalize_key(k: &str) -> String {
    k.strip_prefix("OSCSIM_").unwrap_or(k).to_string()
}

fn is_config_key(k: &str) -> bool {
    // Accept known keys or OSCSIM_* for forward-compat
    const KEYS: &[&str] = &[
        "EXEC_TIMEOUT_MS",
        "MAX_OUTPUT_BYTES",
        "MAX_STEPS",
        "MAX_COLLECTION_LEN",
        "MAX_SAMPLES_PER_CALL",
        "MAX_TOTAL_SAMPLES",
        "RESULT_BINDING",
        "PRETTY_OUTPUT",
    ];

    KEYS.contains(&k) || k.starts_with("OSCSIM_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("oscsim").join(".oscsimrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();

    // Numbers
    m.insert("EXEC_TIMEOUT_MS".into(), "5000".into());
    m.insert("MAX_OUTPUT_BYTES".into(), (1024 * 1024).to_string());
    m.insert("MAX_STEPS".into(), "10000000".into());
    m.insert("MAX_COLLECTION_LEN".into(), "10000000".into());
    m.insert("MAX_SAMPLES_PER_CALL".into(), "1000000".into());
    m.insert("MAX_TOTAL_SAMPLES".into(), "5000000".into());

    // Strings
    m.insert("RESULT_BINDING".into(), "result".into());

    // Bools as strings
    m.insert("PRETTY_OUTPUT".into(), "false".into());

    m
}
