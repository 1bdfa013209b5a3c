use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EndpointCfg {
    /// SSE chat endpoint, e.g. http://localhost:3000/api/chat
    pub url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable that contains the bearer key, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StreamCfg {
    /// How long the stop affordance stays armed after a stop request.
    #[serde(default = "default_stop_cooldown_ms")]
    pub stop_cooldown_ms: u64,
    /// Malformed frames tolerated per session before it is errored.
    /// `None` never aborts on malformed frames alone.
    #[serde(default)]
    pub malformed_tolerance: Option<u32>,
    /// Character ceiling for user-authored input.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for StreamCfg {
    fn default() -> Self {
        Self {
            stop_cooldown_ms: default_stop_cooldown_ms(),
            malformed_tolerance: None,
            max_input_chars: default_max_input_chars(),
        }
    }
}

fn default_stop_cooldown_ms() -> u64 {
    1_000
}
fn default_max_input_chars() -> usize {
    12_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Longest silence between body chunks before the stream is treated as
    /// dropped (default 60000ms). Not a cap on the whole response: a reply
    /// that keeps producing frames may run for as long as it needs.
    #[serde(default = "default_read_timeout_ms", alias = "request_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Optional per-host idle connection pool cap (None = reqwest default)
    #[serde(default)]
    pub pool_max_idle_per_host: Option<usize>,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            pool_max_idle_per_host: None,
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_read_timeout_ms() -> u64 {
    60_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    pub endpoint: EndpointCfg,
    /// Streaming policy. Missing → defaults.
    #[serde(default)]
    pub stream: StreamCfg,
    /// HTTP client configuration (timeouts, pooling). Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
}

impl Config {
    /// Config for a bare endpoint URL with every other section defaulted.
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            endpoint: EndpointCfg {
                url: url.into(),
                model: default_model(),
                api_key_env: None,
                temperature: None,
            },
            stream: StreamCfg::default(),
            http: HttpCfg::default(),
        }
    }

    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(crate::error::ChatStreamError::from)?;
        let s = std::str::from_utf8(&bytes)
            .map_err(|e| crate::error::ChatStreamError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::ChatStreamError::Other(e.into()))?,
            Some("toml") => toml::from_str::<Self>(s)
                .map_err(|e| crate::error::ChatStreamError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| crate::error::ChatStreamError::Other(e.into()))
                .or_else(|_| {
                    toml::from_str::<Self>(s)
                        .map_err(|e| crate::error::ChatStreamError::Other(e.into()))
                })?,
        };
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatStreamError;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn load_from_json() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("chat.json");
        let json = r#"{
          "endpoint": {
            "url": "http://localhost:3000/api/chat",
            "model": "gpt-4o",
            "api_key_env": "CHAT_API_KEY",
            "temperature": 0.9
          },
          "stream": {"stop_cooldown_ms": 250, "malformed_tolerance": 3}
        }"#;
        fs::write(&file, json).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.endpoint.model, "gpt-4o");
        assert_eq!(cfg.endpoint.api_key_env.as_deref(), Some("CHAT_API_KEY"));
        assert_eq!(cfg.stream.stop_cooldown_ms, 250);
        assert_eq!(cfg.stream.malformed_tolerance, Some(3));
        assert_eq!(cfg.stream.max_input_chars, 12_000);
        assert_eq!(cfg.http, HttpCfg::default());
    }

    #[test]
    fn load_from_toml_with_defaults() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("chat.toml");
        let toml = r#"
[endpoint]
url = "http://localhost:3000/api/chat"

[http]
connect_timeout_ms = 1000
"#;
        fs::write(&file, toml).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.endpoint.model, "gpt-3.5-turbo");
        assert_eq!(cfg.endpoint.temperature, None);
        assert_eq!(cfg.stream, StreamCfg::default());
        assert_eq!(cfg.stream.stop_cooldown_ms, 1_000);
        assert_eq!(cfg.stream.malformed_tolerance, None);
        assert_eq!(cfg.http.connect_timeout_ms, 1_000);
        assert_eq!(cfg.http.read_timeout_ms, 60_000);
    }

    #[test]
    fn legacy_request_timeout_key_sets_read_timeout() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("chat.toml");
        let toml = r#"
[endpoint]
url = "http://localhost:3000/api/chat"

[http]
request_timeout_ms = 2500
"#;
        fs::write(&file, toml).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.http.read_timeout_ms, 2_500);
    }

    #[test]
    fn missing_file_returns_io_error() {
        let missing = std::path::PathBuf::from("/definitely/not/here/chatstream-missing.json");
        let err = Config::from_path(&missing).unwrap_err();
        match err {
            ChatStreamError::Io(_) => {}
            other => panic!("expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_utf8_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.bin");
        fs::write(&file, vec![0xff, 0xfe, 0xfd, 0x00, 0x80]).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            ChatStreamError::Other(_) => {}
            other => panic!("expected Other(utf8) error, got: {:?}", other),
        }
    }

    #[test]
    fn missing_endpoint_is_a_parse_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.json");
        fs::write(&file, r#"{ "stream": { "stop_cooldown_ms": 5 } }"#).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        assert!(matches!(err, ChatStreamError::Other(_)));
    }

    #[test]
    fn unknown_extension_falls_back_to_json_then_toml() {
        let dir = tempdir().unwrap();
        let json_path = dir.path().join("chat.conf");
        fs::write(&json_path, r#"{"endpoint":{"url":"http://a"}}"#).unwrap();
        let cfg = Config::from_path(&json_path).unwrap();
        assert_eq!(cfg.endpoint.url, "http://a");

        let toml_path = dir.path().join("chat2.conf");
        fs::write(&toml_path, "[endpoint]\nurl = \"http://b\"\n").unwrap();
        let cfg = Config::from_path(&toml_path).unwrap();
        assert_eq!(cfg.endpoint.url, "http://b");
        assert_eq!(cfg.stream.max_input_chars, 12_000);
    }
}
