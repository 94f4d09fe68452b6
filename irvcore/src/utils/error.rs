use thiserror::Error;

#[derive(Debug, Error)]
pub enum IrvError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse project file '{file}': {source}")]
    ManifestParseError {
        source: toml::de::Error,
        file: String,
    },

    #[error(transparent)]
    Model(#[from] irvmodel::utils::Error),

    #[error("A design load is already running on this store")]
    LoadInProgress,

    #[error("The design load thread panicked")]
    LoaderPanicked,

    #[error("An unknown error occurred: {0}")]
    Unknown(String),
}

pub type IrvResult<T> = Result<T, IrvError>;
