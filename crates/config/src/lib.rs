//! Configuration for compdb.
//!
//! Sources are merged with [`figment`], later ones overriding earlier ones:
//!
//! 1. `config.toml` in the user's configuration directory (if present),
//! 2. an explicit file passed by the caller (TOML, YAML or JSON, chosen by
//!    extension),
//! 3. `COMPDB_`-prefixed environment variables; `__` separates nested keys,
//!    so `COMPDB_GENERATORS__KERNEL=false` disables the kernel generator.
//!
//! ```toml
//! source_root = "/home/me/chromiumos"
//! board = "brya"
//!
//! [generators]
//! kernel = false
//!
//! [[packages]]
//! atom = "chromeos-base/my-daemon"
//! source_dir = "src/platform2/my-daemon"
//! ```

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Toml, Yaml};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "COMPDB_";

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Root of the ChromiumOS checkout (the directory containing `src/`).
    pub source_root: PathBuf,
    /// Board whose sysroot packages are built for.
    pub board: String,
    /// Host location of the SDK chroot; defaults to `<source_root>/chroot`.
    #[serde(default)]
    pub chroot: Option<PathBuf>,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub generators: Generators,
    /// Extra package mappings, taking precedence over the built-in table.
    #[serde(default)]
    pub packages: Vec<PackageEntry>,
}

/// Which generator families are enabled.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Generators {
    pub platform2: bool,
    pub kernel: bool,
}
impl Default for Generators {
    fn default() -> Self {
        Self { platform2: true, kernel: true }
    }
}

/// Maps a source directory to the package that builds it.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PackageEntry {
    /// `category/name`
    pub atom: String,
    /// Relative to `source_root`.
    pub source_dir: PathBuf,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}
impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl Config {
    /// Load and validate the configuration from every source.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(explicit)?)
    }

    /// Assemble the provider stack without extracting it.
    pub fn figment(explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::new();
        if let Some(path) = default_path() {
            tracing::trace!(path = %path.display(), "Looking for user configuration");
            figment = figment.merge(Toml::file(path));
        }
        if let Some(path) = explicit {
            if !path.is_file() {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
            }
            figment = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Extract from an already assembled provider stack, then validate.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().or_raise(|| ErrorKind::Load)?;
        config.validate()?;
        Ok(config)
    }

    /// Host location of the SDK chroot.
    pub fn chroot_dir(&self) -> PathBuf {
        self.chroot.clone().unwrap_or_else(|| self.source_root.join("chroot"))
    }

    fn validate(&self) -> Result<()> {
        if !self.source_root.is_absolute() {
            exn::bail!(ErrorKind::Invalid(format!("source_root must be absolute: {}", self.source_root.display())));
        }
        if self.board.is_empty() || self.board.contains(|c: char| c.is_whitespace() || c == '/') {
            exn::bail!(ErrorKind::Invalid(format!("not a board name: {:?}", self.board)));
        }
        for entry in &self.packages {
            if entry.atom.split('/').filter(|part| !part.is_empty()).count() != 2 {
                exn::bail!(ErrorKind::Invalid(format!("package atom must be category/name: {:?}", entry.atom)));
            }
            if entry.source_dir.is_absolute() {
                exn::bail!(ErrorKind::Invalid(format!(
                    "source_dir must be relative to source_root: {}",
                    entry.source_dir.display()
                )));
            }
        }
        Ok(())
    }
}

/// `config.toml` inside the platform's configuration directory.
pub fn default_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "compdb").map(|dirs| dirs.config_dir().join("config.toml"))
}
