use std::path::PathBuf;

use strum::EnumIs;
use thiserror::Error;

#[derive(Debug, EnumIs, Error)]
pub enum Error {
    /// A constraint record declares a type tag with no registered constructor.
    #[error(
        "Placement constraint `{path}` declares type `{tag}`, but no constructor is registered for that type."
    )]
    UnknownConstraintType { tag: String, path: String },

    /// A field required by the constraint type is absent from the record.
    #[error("Placement constraint `{path}` is missing required field `{field}`.")]
    MissingField { field: &'static str, path: String },

    /// The hierarchical path is empty or has no leading module segment.
    #[error("Hierarchical path `{0}` does not name a module in its first segment.")]
    InvalidPath(String),

    /// No constraint is stored under the given key.
    #[error("The referenced placement constraint no longer exists in the hierarchy.")]
    UnknownConstraint,

    /// No module with the given name is known to the hierarchy.
    #[error("Module `{0}` is not known to the hierarchy.")]
    UnknownModule(String),

    /// Routing pitch must be strictly positive.
    #[error("Metal layer `{layer}` declares a non-positive pitch `{pitch}`.")]
    InvalidPitch { layer: String, pitch: String },

    /// Routing direction string is neither `horizontal` nor `vertical`.
    #[error("Unknown routing direction `{0}`, expected `horizontal` or `vertical`.")]
    UnknownDirection(String),

    /// A source file could not be read.
    #[error("Failed to read source file `{}`: {source}", .file.display())]
    SourceRead {
        file: PathBuf,
        source: std::io::Error,
    },

    /// The injected macro parser rejected a file.
    #[error("Failed to parse macro file `{}`: {reason}", .file.display())]
    MacroParse { file: PathBuf, reason: String },

    /// A macro file was added to a library that has no parser.
    #[error("Cannot load macro file `{}`: the library has no macro parser attached.", .0.display())]
    MacroParserMissing(PathBuf),
}

pub type ModelResult<T> = Result<T, Error>;
