//! Staging directory layout
//!
//! The directory an item sits in is its delivery state:
//!
//! ```text
//! {root}/Inbox/   newly written events
//! {root}/Outbox/  items being delivered or awaiting retry
//! {root}/Sent/    delivered items, kept for inspection
//! ```

use crate::config::ShipperConfig;
use crate::{Result, ShipError};
use std::ffi::OsStr;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Number of trailing path components compared when matching a directory
/// against a stage. Stored configuration and the live filesystem can disagree
/// about absolute roots (symlinked home directories, relocated containers).
pub const LOCATION_MATCH_DEPTH: usize = 3;

/// One of the three staging directories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Newly written events
    Inbox,
    /// Items being delivered
    Outbox,
    /// Delivered items
    Sent,
}

impl Stage {
    /// All stages, in lifecycle order
    pub const ALL: [Stage; 3] = [Stage::Inbox, Stage::Outbox, Stage::Sent];

    /// Directory name of the stage
    pub fn dir_name(self) -> &'static str {
        match self {
            Stage::Inbox => "Inbox",
            Stage::Outbox => "Outbox",
            Stage::Sent => "Sent",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Paths of the three staging directories under one root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
    inbox: PathBuf,
    outbox: PathBuf,
    sent: PathBuf,
}

impl StorageLayout {
    /// Layout under an explicit root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            inbox: root.join(Stage::Inbox.dir_name()),
            outbox: root.join(Stage::Outbox.dir_name()),
            sent: root.join(Stage::Sent.dir_name()),
            root,
        }
    }

    /// Layout described by a configuration
    pub fn from_config(config: &ShipperConfig) -> Self {
        Self::new(config.storage.root())
    }

    /// Staging root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a stage
    pub fn dir(&self, stage: Stage) -> &Path {
        match stage {
            Stage::Inbox => &self.inbox,
            Stage::Outbox => &self.outbox,
            Stage::Sent => &self.sent,
        }
    }

    /// Where an item with the same file name lives in `stage`
    pub fn staged_path(&self, stage: Stage, item: &Path) -> Option<PathBuf> {
        item.file_name().map(|name| self.dir(stage).join(name))
    }

    /// Create the three directories if needed.
    ///
    /// Idempotent. Fails with `DirectorySetup` when something other than a
    /// directory occupies one of the paths.
    pub fn ensure_directories(&self) -> Result<()> {
        for stage in Stage::ALL {
            let dir = self.dir(stage);
            match std::fs::metadata(dir) {
                Ok(meta) if meta.is_dir() => continue,
                Ok(_) => {
                    return Err(ShipError::DirectorySetup {
                        path: dir.to_path_buf(),
                        source: None,
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(ShipError::DirectorySetup {
                        path: dir.to_path_buf(),
                        source: Some(e),
                    })
                }
            }
            std::fs::create_dir_all(dir).map_err(|e| ShipError::DirectorySetup {
                path: dir.to_path_buf(),
                source: Some(e),
            })?;
            debug!("Created staging directory {}", dir.display());
        }
        Ok(())
    }

    /// Stage whose directory matches `dir` on the last
    /// [`LOCATION_MATCH_DEPTH`] components
    pub fn stage_of_dir(&self, dir: &Path) -> Option<Stage> {
        let wanted = tail(dir, LOCATION_MATCH_DEPTH);
        Stage::ALL
            .into_iter()
            .find(|stage| tail(self.dir(*stage), LOCATION_MATCH_DEPTH) == wanted)
    }

    /// Stage an item currently sits in, judged by its parent directory
    pub fn stage_of(&self, item: &Path) -> Option<Stage> {
        item.parent().and_then(|parent| self.stage_of_dir(parent))
    }

    /// Regular, non-hidden files of a stage, sorted by name
    pub fn list(&self, stage: Stage) -> std::io::Result<Vec<PathBuf>> {
        let mut items = Vec::new();
        for entry in std::fs::read_dir(self.dir(stage))? {
            let entry = entry?;
            if is_hidden(&entry.file_name()) || !entry.file_type()?.is_file() {
                continue;
            }
            items.push(entry.path());
        }
        items.sort();
        Ok(items)
    }
}

/// Last `n` normal components of a path, outermost first
pub fn tail(path: &Path, n: usize) -> Vec<&OsStr> {
    let mut parts: Vec<&OsStr> = path
        .components()
        .rev()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .take(n)
        .collect();
    parts.reverse();
    parts
}

pub(crate) fn is_hidden(name: &OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_tail_components() {
        let path = Path::new("/Users/aname/Library/Application Support/An App/aFile.txt");
        assert_eq!(tail(path, 1), vec![OsStr::new("aFile.txt")]);
        assert_eq!(
            tail(path, 3),
            vec![
                OsStr::new("Application Support"),
                OsStr::new("An App"),
                OsStr::new("aFile.txt")
            ]
        );
        // Asking for more than exists returns everything
        assert_eq!(tail(path, 10).len(), 6);
        // A trailing slash does not add a component
        assert_eq!(tail(Path::new("/a/b/c/"), 1), vec![OsStr::new("c")]);
    }

    #[test]
    fn test_ensure_directories_is_idempotent() {
        let dir = tempdir().unwrap();
        let layout = StorageLayout::new(dir.path().join("app/queue"));

        layout.ensure_directories().unwrap();
        layout.ensure_directories().unwrap();

        for stage in Stage::ALL {
            assert!(layout.dir(stage).is_dir());
        }
    }

    #[test]
    fn test_ensure_directories_rejects_file_in_the_way() {
        let dir = tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        std::fs::write(layout.dir(Stage::Outbox), b"not a directory").unwrap();

        match layout.ensure_directories() {
            Err(ShipError::DirectorySetup { path, source }) => {
                assert_eq!(path, layout.dir(Stage::Outbox));
                assert!(source.is_none());
            }
            other => panic!("Expected DirectorySetup error, got {:?}", other),
        }
    }

    #[test]
    fn test_stage_of_tolerates_different_roots() {
        let layout = StorageLayout::new("/old/home/app/queue");

        let moved = Path::new("/new/mount/app/queue/Outbox/item.json");
        assert_eq!(layout.stage_of(moved), Some(Stage::Outbox));

        let inbox = Path::new("/old/home/app/queue/Inbox/item.json");
        assert_eq!(layout.stage_of(inbox), Some(Stage::Inbox));

        let elsewhere = Path::new("/old/home/app/other/Inbox/item.json");
        assert_eq!(layout.stage_of(elsewhere), None);
    }

    #[test]
    fn test_list_skips_hidden_files_and_directories() {
        let dir = tempdir().unwrap();
        let layout = StorageLayout::new(dir.path());
        layout.ensure_directories().unwrap();

        let inbox = layout.dir(Stage::Inbox);
        std::fs::write(inbox.join("b.json"), b"{}").unwrap();
        std::fs::write(inbox.join("a.json"), b"{}").unwrap();
        std::fs::write(inbox.join(".partial.tmp"), b"{").unwrap();
        std::fs::create_dir(inbox.join("nested")).unwrap();

        let items = layout.list(Stage::Inbox).unwrap();
        assert_eq!(items, vec![inbox.join("a.json"), inbox.join("b.json")]);
    }

    #[test]
    fn test_staged_path_keeps_file_name() {
        let layout = StorageLayout::new("/q");
        let item = Path::new("/q/Inbox/123.event.json");
        assert_eq!(
            layout.staged_path(Stage::Sent, item),
            Some(PathBuf::from("/q/Sent/123.event.json"))
        );
    }
}
