use std::{fmt::Display, path::PathBuf};

use crate::{get_token, TokenSource};
use hf_hub::{
    api::sync::{ApiBuilder, ApiRepo},
    Repo, RepoType,
};

/// A Hugging Face Hub repository to fetch model files from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    model_id: String,
    revision: Option<String>,
}

impl Display for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.revision {
            Some(revision) => write!(f, "model id: {}@{revision}", self.model_id),
            None => write!(f, "model id: {}", self.model_id),
        }
    }
}

impl ModelSource {
    /// Load the model from a Hugging Face model ID.
    pub fn from_model_id<S: ToString>(model_id: S) -> Self {
        Self {
            model_id: model_id.to_string(),
            revision: None,
        }
    }

    /// Pin a branch, tag or commit. `None` means `main`.
    pub fn with_revision(mut self, revision: Option<String>) -> Self {
        self.revision = revision;
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn revision(&self) -> &str {
        self.revision.as_deref().unwrap_or("main")
    }
}

/// Fetches files of one [`ModelSource`], downloading into the local Hub cache as needed.
pub struct FileLoader {
    api: Box<ApiRepo>,
}

impl FileLoader {
    pub fn from_model_source(
        source: &ModelSource,
        silent: bool,
        token: &TokenSource,
    ) -> anyhow::Result<Self> {
        let api_builder = ApiBuilder::new()
            .with_progress(!silent)
            .with_token(get_token(token)?)
            .build()?;
        let api = api_builder.repo(Repo::with_revision(
            source.model_id().to_string(),
            RepoType::Model,
            source.revision().to_string(),
        ));

        Ok(Self { api: Box::new(api) })
    }

    /// All file names in the repository, relative to its root.
    pub fn list_files(&self) -> anyhow::Result<Vec<String>> {
        self.api
            .info()
            .map(|repo| {
                repo.siblings
                    .iter()
                    .map(|x| x.rfilename.clone())
                    .collect::<Vec<String>>()
            })
            .map_err(|e| anyhow::Error::msg(e.to_string()))
    }

    /// Return a local path to the file, downloading it if it is not cached.
    pub fn read_file(&self, name: &str) -> anyhow::Result<PathBuf> {
        self.api
            .get(name)
            .map_err(|e| anyhow::Error::msg(format!("could not fetch `{name}`: {e}")))
    }
}
