//! Resolution of the configured `filepath` into a directory and a template

use std::path::{Path, PathBuf};

use storage::StorageBackend;
use train_core::{LoggerLayout, Result};

/// Extension of every checkpoint file
pub const CHECKPOINT_EXTENSION: &str = "ckpt";

/// Subdirectory used below a logger version or the trainer root
pub const CHECKPOINTS_DIR: &str = "checkpoints";

/// Where checkpoints go, as far as the configuration alone can tell
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Destination {
    /// Target directory; `None` until the trainer supplies one
    pub dirpath: Option<PathBuf>,

    /// Filename template taken from the configured path, if any
    pub filename: Option<String>,
}

impl Destination {
    /// Interpret a configured `filepath`.
    ///
    /// - unset or empty: nothing is known yet
    /// - existing directory: used as is, default template
    /// - anything else: made absolute and split into parent directory and
    ///   file name; the file name becomes the template
    pub async fn from_filepath(
        storage: &dyn StorageBackend,
        filepath: Option<&Path>,
    ) -> Result<Self> {
        let path = match filepath {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => return Ok(Self::default()),
        };

        if storage.is_dir(path).await? {
            return Ok(Self {
                dirpath: Some(path.to_path_buf()),
                filename: None,
            });
        }

        let absolute = std::path::absolute(path)?;
        let filename = absolute
            .file_name()
            .map(|n| strip_extension(&n.to_string_lossy()).to_string());
        let dirpath = absolute.parent().map(Path::to_path_buf);

        Ok(Self { dirpath, filename })
    }

    /// Directory chosen at training start when none was configured
    pub async fn trainer_dir(
        storage: &dyn StorageBackend,
        default_root_dir: &Path,
        logger: Option<&LoggerLayout>,
    ) -> Result<PathBuf> {
        let layout = match logger {
            Some(layout) => layout,
            None => return Ok(default_root_dir.join(CHECKPOINTS_DIR)),
        };

        let existing = match layout.version {
            Some(_) => Vec::new(),
            None => storage.list_dirs(&layout.experiment_dir()).await?,
        };
        let names = existing
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy());
        Ok(layout.version_dir(names).join(CHECKPOINTS_DIR))
    }

    /// Full path for a filename stem
    pub fn path_for(&self, stem: &str) -> PathBuf {
        let file = format!("{}.{}", stem, CHECKPOINT_EXTENSION);
        match &self.dirpath {
            Some(dir) => dir.join(file),
            None => PathBuf::from(file),
        }
    }
}

fn strip_extension(name: &str) -> &str {
    name.strip_suffix(".ckpt").unwrap_or(name)
}
