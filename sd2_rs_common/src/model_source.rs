use std::{
    fmt::Display,
    fs,
    path::{Path, PathBuf},
};

use crate::TokenSource;
use hf_hub::{
    api::sync::{Api, ApiBuilder, ApiRepo},
    Repo, RepoType,
};

/// Source from which to load the model. This is easiest to create with the various constructor functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    ModelId(String),
    ModelIdWithTokenizer {
        model_id: String,
        tokenizer_model_id: String,
    },
}

impl Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelId(model_id) => write!(f, "model id: {model_id}"),
            Self::ModelIdWithTokenizer {
                model_id,
                tokenizer_model_id,
            } => write!(
                f,
                "model id: {model_id}, tokenizer override: {tokenizer_model_id}"
            ),
        }
    }
}

impl ModelSource {
    /// Load the model from a Hugging Face model ID or a local path.
    pub fn from_model_id<S: ToString>(model_id: S) -> Self {
        Self::ModelId(model_id.to_string())
    }

    /// Load the tokenizer of this model from another Hugging Face model ID or local path.
    ///
    /// Some repositories only ship the raw BPE vocabulary; this points the loader at a repository
    /// with a complete `tokenizer.json` for the same vocabulary.
    ///
    /// ```rust
    /// use sd2_rs_common::ModelSource;
    ///
    /// let _ = ModelSource::from_model_id("stabilityai/stable-diffusion-2")
    ///     .override_tokenizer_model_id("openai/clip-vit-base-patch32")?;
    ///
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn override_tokenizer_model_id<S: ToString>(self, model_id: S) -> anyhow::Result<Self> {
        let Self::ModelId(base_id) = self else {
            anyhow::bail!("Expected model ID for the model source")
        };
        Ok(Self::ModelIdWithTokenizer {
            model_id: base_id,
            tokenizer_model_id: model_id.to_string(),
        })
    }
}

/// Where the files of one repository live.
enum RepoAccess {
    Api(Box<ApiRepo>),
    Local(PathBuf),
}

impl RepoAccess {
    fn new(
        model_id: &str,
        api: &mut Option<Api>,
        silent: bool,
        token: &TokenSource,
        revision: &str,
    ) -> anyhow::Result<Self> {
        let local = Path::new(model_id);
        if local.is_dir() {
            return Ok(Self::Local(local.to_path_buf()));
        }

        let api = match api.clone() {
            Some(api) => api,
            None => {
                let built = ApiBuilder::new()
                    .with_progress(!silent)
                    .with_token(token.read()?)
                    .build()?;
                *api = Some(built.clone());
                built
            }
        };
        Ok(Self::Api(Box::new(api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            revision.to_string(),
        )))))
    }

    fn list_files(&self) -> anyhow::Result<Vec<String>> {
        match self {
            Self::Api(api) => api
                .info()
                .map(|repo| {
                    repo.siblings
                        .iter()
                        .map(|x| x.rfilename.clone())
                        .collect::<Vec<String>>()
                })
                .map_err(|e| anyhow::Error::msg(e.to_string())),
            Self::Local(root) => {
                let mut files = Vec::new();
                collect_local_files(root, root, &mut files)?;
                files.sort();
                Ok(files)
            }
        }
    }

    fn get(&self, name: &str) -> anyhow::Result<PathBuf> {
        match self {
            Self::Api(api) => api.get(name).map_err(|e| anyhow::Error::msg(e.to_string())),
            Self::Local(root) => {
                let path = root.join(name);
                if !path.is_file() {
                    anyhow::bail!("file `{name}` not found in `{}`", root.display());
                }
                Ok(path)
            }
        }
    }
}

/// Repository-relative names with `/` separators, matching the Hub listing.
fn collect_local_files(root: &Path, dir: &Path, files: &mut Vec<String>) -> anyhow::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_local_files(root, &path, files)?;
        } else {
            let relative = path.strip_prefix(root)?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push(name);
        }
    }
    Ok(())
}

/// Resolves model files to local paths, downloading them into the Hugging Face cache when needed.
pub struct FileLoader {
    base: RepoAccess,
    tokenizer: Option<RepoAccess>,
}

impl FileLoader {
    /// Note: `token` and `revision` are only used for Hugging Face models.
    pub fn from_model_source(
        source: &ModelSource,
        silent: bool,
        token: TokenSource,
        revision: Option<String>,
    ) -> anyhow::Result<Self> {
        let revision = revision.unwrap_or("main".to_string());
        let mut api = None;
        match source {
            ModelSource::ModelId(model_id) => Ok(Self {
                base: RepoAccess::new(model_id, &mut api, silent, &token, &revision)?,
                tokenizer: None,
            }),
            ModelSource::ModelIdWithTokenizer {
                model_id,
                tokenizer_model_id,
            } => Ok(Self {
                base: RepoAccess::new(model_id, &mut api, silent, &token, &revision)?,
                tokenizer: Some(RepoAccess::new(
                    tokenizer_model_id,
                    &mut api,
                    silent,
                    &token,
                    // The override repository is unrelated to the model's revision history.
                    "main",
                )?),
            }),
        }
    }

    pub fn list_files(&self) -> anyhow::Result<Vec<String>> {
        self.base.list_files()
    }

    /// Read a file, returning its local path.
    ///
    /// With `from_tokenizer`, the file is taken from the tokenizer override repository.
    pub fn read_file(&self, name: &str, from_tokenizer: bool) -> anyhow::Result<PathBuf> {
        match (&self.tokenizer, from_tokenizer) {
            (_, false) => self.base.get(name),
            (Some(tokenizer), true) => tokenizer.get(name),
            (None, true) => anyhow::bail!("This model source has no tokenizer override."),
        }
    }

    /// Read a file into a string.
    pub fn read_to_string(&self, name: &str, from_tokenizer: bool) -> anyhow::Result<String> {
        Ok(fs::read_to_string(self.read_file(name, from_tokenizer)?)?)
    }
}
