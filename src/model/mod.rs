use std::path::PathBuf;

use thiserror::Error;

pub mod build;
pub mod namespace;
pub mod package;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error reading package descriptor: {0}")]
    IO(#[from] std::io::Error),
    #[error("{file} not found in \"{}\"", path.display())]
    MalformedPackage { file: String, path: PathBuf },
    #[error("{message} when reading \"{}\"", path.display())]
    MalformedJson { path: PathBuf, message: String },
    #[error("Field `{key}` in \"{}\" must be {expected}", path.display())]
    InvalidField {
        path: PathBuf,
        key: String,
        expected: &'static str,
    },
}
