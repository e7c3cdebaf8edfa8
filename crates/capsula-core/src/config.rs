//! Run configuration and the context document.
//!
//! A context document maps context names to the dotfiles and environment
//! variables exposed in the container:
//!
//! ```yaml
//! default:
//!   dotfiles: [.bashrc, .gitconfig, .cache!]
//!   environment: [TERM, HOME]
//! work:
//!   dotfiles: [.bashrc, .ssh/config]
//! ```
//!
//! The document is looked up in this order: an explicitly given path,
//! `~/.capsula.yaml`, and finally the built-in document.

use crate::assets::DEFAULT_CONTEXTS;
use crate::context::{is_valid_context_name, Platform};
use crate::error::{CoreError, Result};
use crate::identity::Identity;
use crate::progress::ProgressMode;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Context used when none is requested.
pub const DEFAULT_CONTEXT: &str = "default";

/// File name of the per-user context document in the home directory.
pub const USER_DOCUMENT: &str = ".capsula.yaml";

/// Dotfiles and environment variable names exposed for one context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextProfile {
    /// Dotfile tokens relative to the home directory.
    pub dotfiles: Vec<String>,
    /// Environment variable names passed through.
    pub environment: Vec<String>,
}

/// All contexts known to an invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ContextDocument {
    contexts: BTreeMap<String, ContextProfile>,
}

impl ContextDocument {
    /// Parse a YAML document. An empty document has no contexts.
    pub fn parse(text: &str) -> Result<Self> {
        let blank = text.lines().all(|line| {
            let line = line.trim();
            line.is_empty() || line.starts_with('#')
        });
        if blank {
            return Ok(Self::default());
        }
        let doc: Option<Self> = serde_yaml::from_str(text)?;
        Ok(doc.unwrap_or_default())
    }

    /// The document shipped with Capsula.
    pub fn builtin() -> Result<Self> {
        Self::parse(DEFAULT_CONTEXTS)
    }

    /// Load the document from `explicit`, `~/.capsula.yaml` or the builtin.
    ///
    /// # Errors
    ///
    /// An explicitly given file must exist and parse. A user document that
    /// exists but cannot be parsed is an error as well.
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::read(path).await;
        }
        if let Some(path) = dirs::home_dir().map(|home| home.join(USER_DOCUMENT)) {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Self::read(&path).await;
            }
        }
        tracing::debug!("Using built-in context document");
        Self::builtin()
    }

    async fn read(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading context document");
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            CoreError::Config(format!("cannot read context document {}: {e}", path.display()))
        })?;
        Self::parse(&text).map_err(|e| {
            CoreError::Config(format!("invalid context document {}: {e}", path.display()))
        })
    }

    /// Names of all contexts, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.contexts.keys().map(String::as_str)
    }

    /// Profile for `name`, falling back to [`DEFAULT_CONTEXT`] and then to
    /// an empty profile.
    pub fn profile(&self, name: &str) -> ContextProfile {
        if let Some(profile) = self.contexts.get(name) {
            return profile.clone();
        }
        match self.contexts.get(DEFAULT_CONTEXT) {
            Some(profile) => {
                tracing::warn!(context = %name, "Unknown context, using \"{DEFAULT_CONTEXT}\" profile");
                profile.clone()
            }
            None => {
                tracing::warn!(context = %name, "Unknown context and no default profile");
                ContextProfile::default()
            }
        }
    }
}

/// Everything one invocation needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Engine binary; probed when `None`.
    pub engine: Option<String>,
    /// Image platform (default: debian).
    pub platform: Platform,
    /// Context name (default: "default").
    pub context: String,
    /// Dotfiles and environment for the context.
    pub profile: ContextProfile,
    /// Directory the command runs in; must be below `home`.
    pub workdir: PathBuf,
    /// Home directory of the invoking user.
    pub home: PathBuf,
    /// Host identity; detected when `None`.
    pub identity: Option<Identity>,
    /// Pseudo terminal allocation; detected from stdin when `None`.
    pub tty: Option<bool>,
    /// Grant password-less sudo inside the container.
    pub sudo: bool,
    /// Presentation of build output.
    pub progress: ProgressMode,
    /// Image version tag.
    pub version: String,
    /// Command to run; an empty command starts an interactive shell.
    pub command: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            engine: None,
            platform: Platform::default(),
            context: DEFAULT_CONTEXT.to_string(),
            profile: ContextProfile::default(),
            workdir: PathBuf::new(),
            home: PathBuf::new(),
            identity: None,
            tty: None,
            sudo: false,
            progress: ProgressMode::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            command: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Create a new config builder.
    pub fn builder() -> RunConfigBuilder {
        RunConfigBuilder::default()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_context_name(&self.context) {
            return Err(CoreError::Config(format!(
                "invalid context name \"{}\" (expected lower-case letters and digits, \
                 optionally joined by single '.', '_' or '-')",
                self.context
            )));
        }
        if self.version.trim().is_empty() {
            return Err(CoreError::Config("version must not be empty".into()));
        }
        if matches!(&self.engine, Some(engine) if engine.trim().is_empty()) {
            return Err(CoreError::Config("engine must not be empty".into()));
        }
        if !self.home.is_absolute() {
            return Err(CoreError::Config(format!(
                "home directory {} is not absolute",
                self.home.display()
            )));
        }
        if !self.workdir.is_absolute() {
            return Err(CoreError::Config(format!(
                "working directory {} is not absolute",
                self.workdir.display()
            )));
        }
        Ok(())
    }
}

/// Builder for [`RunConfig`].
#[derive(Debug, Default)]
pub struct RunConfigBuilder {
    config: RunConfig,
}

impl RunConfigBuilder {
    /// Use a specific engine binary instead of probing.
    pub fn engine(mut self, engine: impl Into<String>) -> Self {
        self.config.engine = Some(engine.into());
        self
    }

    /// Set the image platform.
    pub fn platform(mut self, platform: Platform) -> Self {
        self.config.platform = platform;
        self
    }

    /// Set the context name.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.config.context = context.into();
        self
    }

    /// Set the context profile directly.
    pub fn profile(mut self, profile: ContextProfile) -> Self {
        self.config.profile = profile;
        self
    }

    /// Set the working directory (default: the current directory).
    pub fn workdir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.workdir = path.into();
        self
    }

    /// Set the home directory (default: the user's home).
    pub fn home(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.home = path.into();
        self
    }

    /// Use a fixed identity instead of detecting it.
    pub fn identity(mut self, identity: Identity) -> Self {
        self.config.identity = Some(identity);
        self
    }

    /// Force pseudo terminal allocation on or off.
    pub fn tty(mut self, tty: bool) -> Self {
        self.config.tty = Some(tty);
        self
    }

    /// Grant password-less sudo.
    pub fn sudo(mut self, sudo: bool) -> Self {
        self.config.sudo = sudo;
        self
    }

    /// Set how build output is presented.
    pub fn progress(mut self, progress: ProgressMode) -> Self {
        self.config.progress = progress;
        self
    }

    /// Override the image version tag.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into();
        self
    }

    /// Set the command to run.
    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Fill in directory defaults and validate.
    pub fn build(mut self) -> Result<RunConfig> {
        if self.config.workdir.as_os_str().is_empty() {
            self.config.workdir = std::env::current_dir()?;
        }
        if self.config.home.as_os_str().is_empty() {
            self.config.home = dirs::home_dir()
                .ok_or_else(|| CoreError::Config("cannot determine home directory".into()))?;
        }
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_document_has_default_profile() {
        let doc = ContextDocument::builtin().unwrap();
        let profile = doc.profile(DEFAULT_CONTEXT);
        assert!(profile.dotfiles.contains(&".bashrc".to_string()));
        assert!(profile.dotfiles.contains(&".cache!".to_string()));
        assert_eq!(profile.environment, vec!["TERM", "HOME"]);
    }

    #[test]
    fn test_unknown_context_falls_back_to_default() {
        let doc = ContextDocument::parse(
            "default:\n  dotfiles: [.bashrc]\nwork:\n  dotfiles: [.gitconfig]\n  environment: [EDITOR]\n",
        )
        .unwrap();
        assert_eq!(doc.profile("work").environment, vec!["EDITOR"]);
        assert_eq!(doc.profile("nope").dotfiles, vec![".bashrc"]);
        assert!(doc.profile("nope").environment.is_empty());
        assert_eq!(doc.names().collect::<Vec<_>>(), vec!["default", "work"]);
    }

    #[test]
    fn test_missing_default_yields_empty_profile() {
        let doc = ContextDocument::parse("work:\n  dotfiles: [.vimrc]\n").unwrap();
        assert_eq!(doc.profile("other"), ContextProfile::default());
    }

    #[test]
    fn test_empty_document() {
        assert_eq!(ContextDocument::parse("").unwrap(), ContextDocument::default());
        assert_eq!(ContextDocument::parse("# nothing\n").unwrap(), ContextDocument::default());
    }

    #[test]
    fn test_invalid_document_is_config_error() {
        let err = ContextDocument::parse("default:\n  dotfile: [.bashrc]\n").unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[tokio::test]
    async fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contexts.yaml");
        tokio::fs::write(&path, "default:\n  environment: [LANG]\n").await.unwrap();

        let doc = ContextDocument::load(Some(&path)).await.unwrap();
        assert_eq!(doc.profile("default").environment, vec!["LANG"]);
    }

    #[tokio::test]
    async fn test_load_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ContextDocument::load(Some(&dir.path().join("absent.yaml")))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("absent.yaml"));
    }

    #[test]
    fn test_config_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.platform, Platform::Debian);
        assert_eq!(config.context, DEFAULT_CONTEXT);
        assert_eq!(config.version, env!("CARGO_PKG_VERSION"));
        assert!(config.engine.is_none());
        assert!(!config.sudo);
    }

    #[test]
    fn test_builder_success() {
        let config = RunConfig::builder()
            .engine("podman")
            .platform(Platform::Alpine)
            .context("work")
            .home("/home/u")
            .workdir("/home/u/proj")
            .sudo(true)
            .command(["make", "test"])
            .build()
            .expect("should build successfully");

        assert_eq!(config.engine.as_deref(), Some("podman"));
        assert_eq!(config.platform, Platform::Alpine);
        assert_eq!(config.workdir, PathBuf::from("/home/u/proj"));
        assert_eq!(config.command, vec!["make", "test"]);
        assert!(config.sudo);
    }

    #[test]
    fn test_builder_defaults_workdir_to_current_dir() {
        let config = RunConfig::builder().home("/home/u").build().unwrap();
        assert_eq!(config.workdir, std::env::current_dir().unwrap());
    }

    #[test]
    fn test_builder_validation_relative_home() {
        let result = RunConfig::builder().home("home/u").workdir("/home/u").build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_rejects_ambiguous_context_names() {
        for context in ["a/b", "a b", "work.", "Work"] {
            let err = RunConfig::builder()
                .context(context)
                .home("/home/u")
                .workdir("/home/u/proj")
                .build()
                .unwrap_err();
            assert!(matches!(err, CoreError::Config(ref m) if m.contains("invalid context name")));
        }
    }

    #[test]
    fn test_builder_validation_empty_context() {
        let result = RunConfig::builder()
            .context("")
            .home("/home/u")
            .workdir("/home/u")
            .build();
        assert!(result.is_err());
    }
}
