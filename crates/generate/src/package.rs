use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One buildable unit, as the package manager knows it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PackageIdentity {
    /// Relative to the source root.
    pub source_dir: PathBuf,
    pub category: String,
    pub name: String,
}

impl PackageIdentity {
    pub fn new(source_dir: impl Into<PathBuf>, category: impl Into<String>, name: impl Into<String>) -> Self {
        Self { source_dir: source_dir.into(), category: category.into(), name: name.into() }
    }

    /// Parse a `category/name` atom. Anything else (no slash, empty halves,
    /// extra slashes) is rejected.
    pub fn from_atom(atom: &str, source_dir: impl Into<PathBuf>) -> Option<Self> {
        let (category, name) = atom.split_once('/')?;
        if category.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(source_dir, category, name))
    }

    pub fn atom(&self) -> String {
        self.to_string()
    }
}

impl Display for PackageIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.category, self.name)
    }
}

pub type MapperHandle = Arc<dyn PackageMapper>;

/// Resolves a source file to the package that builds it.
pub trait PackageMapper: Send + Sync {
    /// `None` when no known package owns `path`.
    fn from_file_path(&self, path: &Path) -> Option<PackageIdentity>;
}

const BUILTIN_PACKAGES: &[(&str, &str)] = &[
    ("src/platform2/codelab", "chromeos-base/codelab"),
    ("src/platform2/cros-disks", "chromeos-base/cros-disks"),
    ("src/platform2/cryptohome", "chromeos-base/cryptohome"),
    ("src/platform2/debugd", "chromeos-base/debugd"),
    ("src/platform2/libbrillo", "chromeos-base/libbrillo"),
    ("src/platform2/login_manager", "chromeos-base/chromeos-login"),
    ("src/platform2/power_manager", "chromeos-base/power_manager"),
    ("src/platform2/shill", "chromeos-base/shill"),
    ("src/platform2/vm_tools", "chromeos-base/vm_host_tools"),
    ("src/third_party/kernel/v5.4", "sys-kernel/chromeos-kernel-5_4"),
    ("src/third_party/kernel/v5.10", "sys-kernel/chromeos-kernel-5_10"),
    ("src/third_party/kernel/v5.15", "sys-kernel/chromeos-kernel-5_15"),
    ("src/third_party/kernel/v6.1", "sys-kernel/chromeos-kernel-6_1"),
    ("src/third_party/kernel/v6.6", "sys-kernel/chromeos-kernel-6_6"),
];

/// Table-backed [`PackageMapper`].
///
/// A file belongs to the entry whose `source_dir` is the longest
/// (component-wise) prefix of the file's path relative to the source root.
#[derive(Clone, Debug)]
pub struct PackageTable {
    source_root: PathBuf,
    entries: Vec<PackageIdentity>,
}

impl PackageTable {
    /// An empty table.
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self { source_root: source_root.into(), entries: Vec::new() }
    }

    /// A table preloaded with the well-known platform2 packages and kernels.
    pub fn with_builtin(source_root: impl Into<PathBuf>) -> Self {
        let mut table = Self::new(source_root);
        for (source_dir, atom) in BUILTIN_PACKAGES {
            if let Some(package) = PackageIdentity::from_atom(atom, source_dir) {
                table.insert(package);
            }
        }
        table
    }

    /// Add `package`, replacing whatever was mapped to the same directory.
    pub fn insert(&mut self, package: PackageIdentity) {
        self.entries.retain(|existing| existing.source_dir != package.source_dir);
        self.entries.push(package);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PackageMapper for PackageTable {
    fn from_file_path(&self, path: &Path) -> Option<PackageIdentity> {
        let relative = path.strip_prefix(&self.source_root).unwrap_or(path);
        if relative.is_absolute() {
            return None;
        }
        self.entries
            .iter()
            .filter(|entry| relative.starts_with(&entry.source_dir))
            .max_by_key(|entry| entry.source_dir.components().count())
            .cloned()
    }
}
