use std::fs::FileType;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::config::UploadConfig;
use crate::models::{FileCandidate, TrackedFile};
use crate::validation::{ValidationRules, validate_file};

/// Entries returned per `read_entries` call by [`FsDirectoryReader`].
pub const FS_BATCH_SIZE: usize = 100;

pub enum Entry {
    File(Box<dyn FileEntry>),
    Directory(Box<dyn DirectoryEntry>),
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::File(file) => file.name(),
            Entry::Directory(dir) => dir.name(),
        }
    }

    pub async fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        if metadata.is_dir() {
            Ok(Entry::Directory(Box::new(FsDirectoryEntry {
                name,
                path: path.to_path_buf(),
            })))
        } else {
            Ok(Entry::File(Box::new(FsFileEntry {
                name,
                path: path.to_path_buf(),
            })))
        }
    }
}

#[async_trait]
pub trait FileEntry: Send + Sync {
    fn name(&self) -> &str;
    async fn file(&self) -> io::Result<FileCandidate>;
}

pub trait DirectoryEntry: Send + Sync {
    fn name(&self) -> &str;
    fn create_reader(&self) -> Box<dyn DirectoryReader>;
}

#[async_trait]
pub trait DirectoryReader: Send {
    /// Returns the next batch of children, or an empty batch once exhausted.
    async fn read_entries(&mut self) -> io::Result<Vec<Entry>>;
}

pub enum DropItem {
    File(FileCandidate),
    Entry(Entry),
}

/// Folder files carry their path below the dropped folder (`""` at its top level).
pub async fn resolve(items: Vec<DropItem>, config: &UploadConfig) -> Vec<TrackedFile> {
    let rules = ValidationRules::from(config);
    let mut resolved = Vec::new();

    for item in items {
        match item {
            DropItem::File(candidate) => accept(candidate, None, rules, &mut resolved),
            DropItem::Entry(Entry::File(file)) => match file.file().await {
                Ok(candidate) => accept(candidate, None, rules, &mut resolved),
                Err(err) => debug!(name = file.name(), error = %err, "skipping unreadable file"),
            },
            DropItem::Entry(Entry::Directory(dir)) if config.enable_folder_upload => {
                walk(dir.as_ref(), rules, &mut resolved).await;
            }
            DropItem::Entry(Entry::Directory(dir)) => {
                debug!(name = dir.name(), "folder upload disabled, skipping directory");
            }
        }
    }

    resolved
}

async fn walk(
    root: &dyn DirectoryEntry,
    rules: ValidationRules<'_>,
    resolved: &mut Vec<TrackedFile>,
) {
    let mut stack: Vec<(Box<dyn DirectoryReader>, String)> =
        vec![(root.create_reader(), String::new())];

    while let Some((mut reader, path)) = stack.pop() {
        let mut subdirs = Vec::new();

        loop {
            let batch = match reader.read_entries().await {
                Ok(batch) => batch,
                Err(err) => {
                    debug!(%path, error = %err, "stopping directory read");
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }

            for entry in batch {
                match entry {
                    Entry::File(file) => match file.file().await {
                        Ok(candidate) => accept(candidate, Some(path.clone()), rules, resolved),
                        Err(err) => {
                            debug!(name = file.name(), error = %err, "skipping unreadable file")
                        }
                    },
                    Entry::Directory(dir) => {
                        subdirs.push((dir.create_reader(), join_path(&path, dir.name())));
                    }
                }
            }
        }

        // Reversed so subdirectories are visited in the order they were listed.
        stack.extend(subdirs.into_iter().rev());
    }
}

fn accept(
    candidate: FileCandidate,
    folder_path: Option<String>,
    rules: ValidationRules<'_>,
    resolved: &mut Vec<TrackedFile>,
) {
    let validation = validate_file(&candidate, rules);
    if validation.valid {
        resolved.push(TrackedFile::new(candidate, folder_path));
    } else {
        debug!(name = %candidate.name, errors = ?validation.errors, "dropping invalid file");
    }
}

pub fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

pub struct FsFileEntry {
    name: String,
    path: PathBuf,
}

#[async_trait]
impl FileEntry for FsFileEntry {
    fn name(&self) -> &str {
        &self.name
    }

    async fn file(&self) -> io::Result<FileCandidate> {
        FileCandidate::from_path(&self.path).await
    }
}

pub struct FsDirectoryEntry {
    name: String,
    path: PathBuf,
}

impl DirectoryEntry for FsDirectoryEntry {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_reader(&self) -> Box<dyn DirectoryReader> {
        Box::new(FsDirectoryReader {
            path: self.path.clone(),
            read_dir: None,
            done: false,
        })
    }
}

pub struct FsDirectoryReader {
    path: PathBuf,
    read_dir: Option<tokio::fs::ReadDir>,
    done: bool,
}

#[async_trait]
impl DirectoryReader for FsDirectoryReader {
    async fn read_entries(&mut self) -> io::Result<Vec<Entry>> {
        if self.done {
            return Ok(Vec::new());
        }

        if self.read_dir.is_none() {
            self.read_dir = Some(tokio::fs::read_dir(&self.path).await?);
        }
        let Some(read_dir) = self.read_dir.as_mut() else {
            return Ok(Vec::new());
        };

        let mut batch = Vec::new();
        while batch.len() < FS_BATCH_SIZE {
            let dir_entry = match read_dir.next_entry().await {
                Ok(Some(dir_entry)) => dir_entry,
                Ok(None) => {
                    self.done = true;
                    break;
                }
                Err(err) => {
                    let path = self.path.display();
                    debug!(%path, error = %err, "directory listing ended early");
                    self.done = true;
                    break;
                }
            };

            let name = dir_entry.file_name().to_string_lossy().into_owned();
            let path = dir_entry.path();
            let file_type = dir_entry.file_type().await;
            if let Some(entry) = fs_entry(name, path, file_type) {
                batch.push(entry);
            }
        }

        Ok(batch)
    }
}

// Symlinks are not followed. An entry whose type cannot be read is skipped on its own.
fn fs_entry(name: String, path: PathBuf, file_type: io::Result<FileType>) -> Option<Entry> {
    match file_type {
        Ok(file_type) if file_type.is_dir() => {
            Some(Entry::Directory(Box::new(FsDirectoryEntry { name, path })))
        }
        Ok(file_type) if file_type.is_file() => {
            Some(Entry::File(Box::new(FsFileEntry { name, path })))
        }
        Ok(_) => None,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "skipping unreadable entry");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;

    #[derive(Clone)]
    enum Node {
        File(&'static str, &'static str, usize),
        Dir(&'static str, Vec<Node>),
        Unreadable(&'static str),
    }

    struct MemFile {
        name: String,
        mime: String,
        size: usize,
        readable: bool,
    }

    #[async_trait]
    impl FileEntry for MemFile {
        fn name(&self) -> &str {
            &self.name
        }

        async fn file(&self) -> io::Result<FileCandidate> {
            if !self.readable {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "denied"));
            }
            Ok(FileCandidate::from_bytes(
                self.name.clone(),
                self.mime.clone(),
                0,
                vec![0u8; self.size],
            ))
        }
    }

    struct MemDir {
        name: String,
        children: Arc<Vec<Node>>,
    }

    impl DirectoryEntry for MemDir {
        fn name(&self) -> &str {
            &self.name
        }

        fn create_reader(&self) -> Box<dyn DirectoryReader> {
            Box::new(MemReader {
                pending: self.children.iter().cloned().collect(),
            })
        }
    }

    // Hands out two entries per call, like a platform reader with a small batch limit.
    struct MemReader {
        pending: VecDeque<Node>,
    }

    #[async_trait]
    impl DirectoryReader for MemReader {
        async fn read_entries(&mut self) -> io::Result<Vec<Entry>> {
            let take = self.pending.len().min(2);
            Ok(self.pending.drain(..take).map(to_entry).collect())
        }
    }

    fn to_entry(node: Node) -> Entry {
        match node {
            Node::File(name, mime, size) => Entry::File(Box::new(MemFile {
                name: name.into(),
                mime: mime.into(),
                size,
                readable: true,
            })),
            Node::Unreadable(name) => Entry::File(Box::new(MemFile {
                name: name.into(),
                mime: String::new(),
                size: 0,
                readable: false,
            })),
            Node::Dir(name, children) => Entry::Directory(Box::new(MemDir {
                name: name.into(),
                children: Arc::new(children),
            })),
        }
    }

    fn paths(files: &[TrackedFile]) -> Vec<(String, Option<String>)> {
        let mut out: Vec<_> = files
            .iter()
            .map(|f| (f.name.clone(), f.folder_path.clone()))
            .collect();
        out.sort();
        out
    }

    fn config() -> UploadConfig {
        UploadConfig::new("http://upload.test")
    }

    #[tokio::test]
    async fn folder_paths_are_relative_to_the_dropped_folder() {
        let tree = Node::Dir(
            "photos",
            vec![
                Node::File("a.txt", "text/plain", 1),
                Node::Dir(
                    "sub",
                    vec![
                        Node::File("b.txt", "text/plain", 1),
                        Node::Dir("deeper", vec![Node::File("c.txt", "text/plain", 1)]),
                    ],
                ),
            ],
        );

        let files = resolve(vec![DropItem::Entry(to_entry(tree))], &config()).await;

        assert_eq!(
            paths(&files),
            vec![
                ("a.txt".to_string(), Some(String::new())),
                ("b.txt".to_string(), Some("sub".to_string())),
                ("c.txt".to_string(), Some("sub/deeper".to_string())),
            ]
        );
        assert!(files.iter().all(|f| f.status == crate::models::UploadStatus::Pending));
    }

    #[tokio::test]
    async fn reads_every_batch_of_a_large_directory() {
        let children: Vec<Node> = ["f0", "f1", "f2", "f3", "f4", "f5", "f6"]
            .into_iter()
            .map(|name| Node::File(name, "", 1))
            .collect();
        let files = resolve(
            vec![DropItem::Entry(to_entry(Node::Dir("many", children)))],
            &config(),
        )
        .await;
        assert_eq!(files.len(), 7);
    }

    #[tokio::test]
    async fn invalid_and_unreadable_files_are_dropped() {
        let mut config = config();
        config.allowed_types = vec![".txt".to_string()];
        config.max_file_size = Some(10);

        let tree = Node::Dir(
            "mixed",
            vec![
                Node::File("ok.txt", "text/plain", 5),
                Node::File("big.txt", "text/plain", 50),
                Node::File("image.png", "image/png", 5),
                Node::Unreadable("locked.txt"),
            ],
        );

        let files = resolve(vec![DropItem::Entry(to_entry(tree))], &config).await;
        assert_eq!(paths(&files), vec![("ok.txt".to_string(), Some(String::new()))]);
    }

    #[tokio::test]
    async fn plain_files_have_no_folder_path() {
        let candidate = FileCandidate::from_bytes("loose.txt", "text/plain", 0, vec![1]);
        let files = resolve(
            vec![
                DropItem::File(candidate),
                DropItem::Entry(to_entry(Node::File("entry.txt", "text/plain", 1))),
            ],
            &config(),
        )
        .await;
        assert_eq!(
            paths(&files),
            vec![("entry.txt".to_string(), None), ("loose.txt".to_string(), None)]
        );
    }

    #[tokio::test]
    async fn directories_are_skipped_when_folder_upload_is_off() {
        let mut config = config();
        config.enable_folder_upload = false;

        let items = vec![
            DropItem::Entry(to_entry(Node::Dir("dir", vec![Node::File("a", "", 1)]))),
            DropItem::Entry(to_entry(Node::File("top.txt", "", 1))),
        ];
        let files = resolve(items, &config).await;
        assert_eq!(paths(&files), vec![("top.txt".to_string(), None)]);
    }

    #[tokio::test]
    async fn walks_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("drop");
        std::fs::create_dir_all(root.join("sub/inner")).unwrap();
        std::fs::write(root.join("a.txt"), b"a").unwrap();
        std::fs::write(root.join("sub/b.txt"), b"bb").unwrap();
        std::fs::write(root.join("sub/inner/c.txt"), b"ccc").unwrap();

        let entry = Entry::from_path(&root).await.unwrap();
        assert_eq!(entry.name(), "drop");
        let files = resolve(vec![DropItem::Entry(entry)], &config()).await;

        assert_eq!(
            paths(&files),
            vec![
                ("a.txt".to_string(), Some(String::new())),
                ("b.txt".to_string(), Some("sub".to_string())),
                ("c.txt".to_string(), Some("sub/inner".to_string())),
            ]
        );
        let c = files.iter().find(|f| f.name == "c.txt").unwrap();
        assert_eq!(c.size, 3);
        assert_eq!(c.mime_type, "text/plain");
    }

    #[tokio::test]
    async fn entries_with_unreadable_type_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(fs_entry("gone".into(), dir.path().join("gone"), Err(denied)).is_none());

        let metadata = tokio::fs::metadata(dir.path().join("a.txt")).await;
        let file_type = metadata.map(|m| m.file_type());
        let file = fs_entry("a.txt".into(), dir.path().join("a.txt"), file_type);
        assert!(matches!(file, Some(Entry::File(ref f)) if f.name() == "a.txt"));

        let metadata = tokio::fs::metadata(dir.path().join("sub")).await;
        let file_type = metadata.map(|m| m.file_type());
        let sub = fs_entry("sub".into(), dir.path().join("sub"), file_type);
        assert!(matches!(sub, Some(Entry::Directory(ref d)) if d.name() == "sub"));
    }

    #[test]
    fn joins_with_slash() {
        assert_eq!(join_path("", "sub"), "sub");
        assert_eq!(join_path("sub", "deeper"), "sub/deeper");
    }
}
