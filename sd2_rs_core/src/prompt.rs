use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{Error, Result};

/// Where the prompt text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    Literal(String),
    File(PathBuf),
}

impl PromptSource {
    /// Interpret a `--prompt` argument: an existing path is read as a prompt file, anything else
    /// is the prompt itself.
    pub fn from_arg<S: AsRef<str>>(arg: S) -> Self {
        let arg = arg.as_ref();
        if Path::new(arg).exists() {
            Self::File(PathBuf::from(arg))
        } else {
            Self::Literal(arg.to_string())
        }
    }

    /// Produce the prompt text. File contents are returned in full, without trimming.
    ///
    /// A prompt with nothing but whitespace is rejected like an empty one, since it would only
    /// condition the model on padding.
    pub fn resolve(&self) -> Result<String> {
        let prompt = match self {
            Self::Literal(prompt) => prompt.clone(),
            Self::File(path) => fs::read_to_string(path).map_err(|source| Error::FileAccess {
                path: path.clone(),
                source,
            })?,
        };
        if prompt.trim().is_empty() {
            return Err(Error::Argument("the prompt is empty".to_string()));
        }
        Ok(prompt)
    }
}
