use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config directory not found")]
    ConfigDirNotFound,

    #[error("Config file {0} does not exist")]
    ConfigFileMissing(PathBuf),

    #[error(
        "No config file found. Looked in:\n\
        - $CLOUDPLANE_CONFIG\n\
        - ./cloudplane.yaml\n\
        - ./.cloudplane/config.yaml\n\
        - ~/.config/cloudplane/config.yaml"
    )]
    ConfigFileNotFound,

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error(
        "Credentials are not configured. Set credentials.secret_id and credentials.secret_key, \
        or CLOUDPLANE_SECRET_ID and CLOUDPLANE_SECRET_KEY"
    )]
    MissingCredentials,

    #[error("Invalid config: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
