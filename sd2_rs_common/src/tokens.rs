use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use thiserror::Error;
use tracing::{debug, warn};

const DEFAULT_TOKEN_VAR: &str = "HUGGING_FACE_HUB_TOKEN";

/// Where the Hugging Face token for gated or private repositories comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    Literal(String),
    EnvVar(String),
    Path(String),
    CacheToken,
    None,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseTokenSourceError {
    #[error("token source `{0}` needs a value, as in `{0}:<value>`")]
    MissingValue(&'static str),
    #[error("unknown token source `{0}`, expected `literal`, `env`, `path`, `cache` or `none`")]
    UnknownKind(String),
}

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("no home directory to find the Hugging Face token cache in")]
    HomeDirectoryMissing,
}

impl FromStr for TokenSource {
    type Err = ParseTokenSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = match s.split_once(':') {
            Some((kind, value)) => (kind, Some(value.to_string())),
            None => (s, None),
        };
        match kind {
            "literal" => value
                .map(Self::Literal)
                .ok_or(ParseTokenSourceError::MissingValue("literal")),
            "env" => Ok(Self::EnvVar(
                value.unwrap_or_else(|| DEFAULT_TOKEN_VAR.to_string()),
            )),
            "path" => value
                .map(Self::Path)
                .ok_or(ParseTokenSourceError::MissingValue("path")),
            "cache" => Ok(Self::CacheToken),
            "none" => Ok(Self::None),
            other => Err(ParseTokenSourceError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => write!(f, "literal:{value}"),
            Self::EnvVar(var) => write!(f, "env:{var}"),
            Self::Path(path) => write!(f, "path:{path}"),
            Self::CacheToken => f.write_str("cache"),
            Self::None => f.write_str("none"),
        }
    }
}

fn cached_token_path() -> Result<PathBuf, TokenError> {
    dirs::home_dir()
        .map(|home| home.join(".cache").join("huggingface").join("token"))
        .ok_or(TokenError::HomeDirectoryMissing)
}

fn read_token_file(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(token) => Some(token),
        Err(e) => {
            warn!(
                "could not read token file `{}` ({e}), continuing without a token",
                path.display()
            );
            None
        }
    }
}

impl TokenSource {
    /// Read the token. Unreadable or blank tokens are logged and treated as no token, so public
    /// repositories still load.
    pub fn read(&self) -> Result<Option<String>, TokenError> {
        let raw = match self {
            Self::Literal(token) => Some(token.clone()),
            Self::EnvVar(var) => env::var(var)
                .inspect_err(|_| warn!("`{var}` is not set, continuing without a token"))
                .ok(),
            Self::Path(path) => read_token_file(Path::new(path)),
            Self::CacheToken => read_token_file(&cached_token_path()?),
            Self::None => None,
        };

        let token = raw
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());
        if token.is_none() && *self != Self::None {
            debug!("no Hugging Face token from {self}");
        }
        Ok(token)
    }
}
