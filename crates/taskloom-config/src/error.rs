use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config file '{path}'")]
  Io {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config file '{path}'")]
  Parse {
    path: String,
    #[source]
    source: serde_json::Error,
  },
}
