use crate::error::{ErrorKind, Result};
use crate::package::PackageIdentity;
use compdb_sandbox::BuildSandbox;
use exn::ResultExt;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;

/// File name the build system writes, with chroot paths already rewritten
/// to host paths.
pub const ARTIFACT_FILE_NAME: &str = "compile_commands_no_chroot.json";

/// Where the database the build emitted lives, before publication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildArtifact {
    /// Absolute path inside the sandbox.
    pub base_dir: PathBuf,
    pub relative_path: PathBuf,
}

impl BuildArtifact {
    /// Sandbox path of the artifact.
    pub fn path(&self) -> PathBuf {
        self.base_dir.join(&self.relative_path)
    }
}

/// Where a build-system family leaves its database.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactLayout {
    /// Inside the newest `<name>-<version>` work directory under Portage's
    /// temporary build root.
    PortageWork,
    /// Inside the package's directory in Portage's persistent cache.
    PortageCache,
}

impl ArtifactLayout {
    /// Find the artifact of the most recent build of `package`, if any.
    pub async fn locate(
        &self,
        sandbox: &dyn BuildSandbox,
        board: &str,
        package: &PackageIdentity,
    ) -> Option<BuildArtifact> {
        let artifact = match self {
            Self::PortageWork => {
                let category_dir = Path::new("/build").join(board).join("tmp/portage").join(&package.category);
                let work_dir = newest_work_dir(&sandbox.host_path(&category_dir), &package.name).await?;
                BuildArtifact {
                    base_dir: category_dir.join(work_dir),
                    relative_path: Path::new("work/build/out/Default").join(ARTIFACT_FILE_NAME),
                }
            },
            Self::PortageCache => BuildArtifact {
                base_dir: portage_cache_dir(board, package),
                relative_path: PathBuf::from(ARTIFACT_FILE_NAME),
            },
        };
        let host = sandbox.host_path(&artifact.path());
        match fs::metadata(&host).await {
            Ok(metadata) if metadata.is_file() => Some(artifact),
            _ => {
                tracing::debug!(path = %host.display(), "No compilation database at expected location");
                None
            },
        }
    }
}

/// The package's directory in Portage's cache, as seen inside the sandbox.
pub fn portage_cache_dir(board: &str, package: &PackageIdentity) -> PathBuf {
    Path::new("/build")
        .join(board)
        .join("var/cache/portage")
        .join(&package.category)
        .join(&package.name)
}

/// Name of the most recently modified `<name>-<version>` directory under
/// `category_dir`.
async fn newest_work_dir(category_dir: &Path, name: &str) -> Option<String> {
    let mut entries = fs::read_dir(category_dir).await.ok()?;
    let mut newest: Option<(SystemTime, String)> = None;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        // `shill-9999` belongs to `shill`, `shill-extras-0.1` does not.
        let is_version_of = file_name
            .strip_prefix(name)
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|version| version.starts_with(|c: char| c.is_ascii_digit()));
        if !is_version_of {
            continue;
        }
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_dir() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().is_none_or(|(time, _)| modified > *time) {
            newest = Some((modified, file_name));
        }
    }
    newest.map(|(_, name)| name)
}

/// One translation unit of a compilation database.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct CompdbEntry {
    pub directory: PathBuf,
    pub file: PathBuf,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub arguments: Option<Vec<String>>,
}

impl CompdbEntry {
    /// `file` resolved against `directory`.
    pub fn source_path(&self) -> PathBuf {
        self.directory.join(&self.file)
    }
}

/// Count the entries of the database at `path` (a host path) whose source
/// file does not exist yet. Sources generated during the build show up here
/// when only the database was requested.
pub async fn missing_sources(path: &Path) -> Result<usize> {
    let contents = fs::read(path).await.or_raise(|| ErrorKind::ArtifactNotProduced)?;
    let entries: Vec<CompdbEntry> = serde_json::from_slice(&contents).or_raise(|| ErrorKind::ArtifactNotProduced)?;
    let mut missing = 0;
    for entry in &entries {
        let source = entry.source_path();
        if !fs::try_exists(&source).await.unwrap_or(false) {
            tracing::trace!(path = %source.display(), "Source file referenced by database does not exist");
            missing += 1;
        }
    }
    Ok(missing)
}
