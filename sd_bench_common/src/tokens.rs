use std::{env, fmt, fs, path::PathBuf, str::FromStr};
use thiserror::Error;
use tracing::warn;

use anyhow::Result;

const DEFAULT_TOKEN_ENV_VAR: &str = "HUGGING_FACE_HUB_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq)]
/// The source of the HF token.
///
/// Parsed from `literal:<token>`, `env[:<VAR>]`, `path:<file>`, `cache` or `none`.
pub enum TokenSource {
    Literal(String),
    EnvVar(String),
    Path(String),
    CacheToken,
    None,
}

impl FromStr for TokenSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = match s.split_once(':') {
            Some((kind, value)) => (kind, Some(value)),
            None => (s, None),
        };
        match (kind, value) {
            ("literal", Some(value)) => Ok(Self::Literal(value.to_string())),
            ("literal", None) => Err("Expected a value for 'literal'".to_string()),
            ("env", value) => Ok(Self::EnvVar(
                value.unwrap_or(DEFAULT_TOKEN_ENV_VAR).to_string(),
            )),
            ("path", Some(value)) => Ok(Self::Path(value.to_string())),
            ("path", None) => Err("Expected a value for 'path'".to_string()),
            ("cache", None) => Ok(Self::CacheToken),
            ("none", None) => Ok(Self::None),
            _ => Err(format!("Invalid token source `{s}`")),
        }
    }
}

impl fmt::Display for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(_) => write!(f, "literal:<redacted>"),
            Self::EnvVar(value) => write!(f, "env:{value}"),
            Self::Path(value) => write!(f, "path:{value}"),
            Self::CacheToken => write!(f, "cache"),
            Self::None => write!(f, "none"),
        }
    }
}

#[derive(Error, Debug)]
enum TokenRetrievalError {
    #[error("No home directory.")]
    HomeDirectoryMissing,
}

fn cached_token_path() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .ok_or(TokenRetrievalError::HomeDirectoryMissing)?
        .join(".cache")
        .join("huggingface")
        .join("token"))
}

/// Read a token from the given source. If it cannot be read, a warning is logged and *no token is used*.
pub fn get_token(source: &TokenSource) -> Result<Option<String>> {
    fn skip_token(input: &str) -> Option<String> {
        warn!("could not load token at {input:?}, using no HF token.");
        None
    }

    let token = match source {
        TokenSource::Literal(data) => Some(data.clone()),
        TokenSource::EnvVar(envvar) => env::var(envvar).ok().or_else(|| skip_token(envvar)),
        TokenSource::Path(path) => fs::read_to_string(path).ok().or_else(|| skip_token(path)),
        TokenSource::CacheToken => {
            let path = cached_token_path()?;
            fs::read_to_string(&path)
                .ok()
                .or_else(|| skip_token(&path.display().to_string()))
        }
        TokenSource::None => None,
    };

    Ok(token
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parses_every_source_kind() {
        assert_eq!(
            "literal:hf_abc".parse::<TokenSource>(),
            Ok(TokenSource::Literal("hf_abc".to_string()))
        );
        assert_eq!(
            "env".parse::<TokenSource>(),
            Ok(TokenSource::EnvVar(DEFAULT_TOKEN_ENV_VAR.to_string()))
        );
        assert_eq!(
            "env:MY_TOKEN".parse::<TokenSource>(),
            Ok(TokenSource::EnvVar("MY_TOKEN".to_string()))
        );
        assert_eq!(
            "path:/tmp/token".parse::<TokenSource>(),
            Ok(TokenSource::Path("/tmp/token".to_string()))
        );
        assert_eq!("cache".parse::<TokenSource>(), Ok(TokenSource::CacheToken));
        assert_eq!("none".parse::<TokenSource>(), Ok(TokenSource::None));
    }

    #[test]
    fn rejects_malformed_sources() {
        assert!("literal".parse::<TokenSource>().is_err());
        assert!("path".parse::<TokenSource>().is_err());
        assert!("keychain".parse::<TokenSource>().is_err());
        assert!("cache:extra".parse::<TokenSource>().is_err());
    }

    #[test]
    fn display_hides_literal_tokens() {
        let shown = TokenSource::Literal("hf_secret".to_string()).to_string();
        assert!(!shown.contains("hf_secret"));
        assert_eq!(TokenSource::EnvVar("X".to_string()).to_string(), "env:X");
    }

    #[test]
    fn reads_trimmed_token_from_file() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "  hf_from_file  ")?;
        let source = TokenSource::Path(file.path().display().to_string());
        assert_eq!(get_token(&source)?, Some("hf_from_file".to_string()));
        Ok(())
    }

    #[test]
    fn missing_sources_yield_no_token() -> anyhow::Result<()> {
        assert_eq!(get_token(&TokenSource::None)?, None);
        let source = TokenSource::Path("/definitely/not/a/token/file".to_string());
        assert_eq!(get_token(&source)?, None);
        Ok(())
    }
}
