//! Local filesystem content store
//!
//! Objects live at `{root}/{aa}/{bb}/{rest}`. Uploads are written to
//! `{root}/.tmp` first and only renamed into place once their hash checks out.

use crate::{ContentStore, Intake, KeyStream, ObjectStream, Pointer, Result, StoreError};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, File, ReadDir};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

const TEMP_DIR: &str = ".tmp";

/// A content store rooted at a local directory
#[derive(Clone, Debug)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open a store, creating the root directory if needed
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(TEMP_DIR)).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn key_to_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let clean = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !clean || key.starts_with(TEMP_DIR) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn path_of(&self, pointer: &Pointer) -> Result<PathBuf> {
        self.key_to_path(&pointer.relative_path())
    }
}

#[async_trait]
impl ContentStore for LocalStore {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn exists(&self, pointer: &Pointer) -> Result<bool> {
        match fs::metadata(self.path_of(pointer)?).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, pointer: &Pointer, offset: u64) -> Result<ObjectStream> {
        let path = self.path_of(pointer)?;
        let mut file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(pointer.relative_path()))
            }
            Err(e) => return Err(e.into()),
        };
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        Ok(ReaderStream::new(file).boxed())
    }

    async fn put(&self, pointer: &Pointer, mut body: ObjectStream) -> Result<()> {
        let target = self.path_of(pointer)?;
        let temp = self
            .root
            .join(TEMP_DIR)
            .join(uuid::Uuid::new_v4().simple().to_string());

        let written: Result<()> = async {
            let mut file = File::create(&temp).await?;
            let mut intake = Intake::new(pointer);
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                intake.feed(&chunk)?;
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            file.sync_all().await?;
            intake.finish()
        }
        .await;

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&temp).await {
                warn!(path = %temp.display(), error = %cleanup, "failed to remove temp upload");
            }
            return Err(e);
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&temp, &target).await?;
        debug!(oid = %pointer.oid, size = pointer.size, "stored object");
        Ok(())
    }

    fn iterate_keys(&self, prefix: &str) -> KeyStream {
        let walk = Walk {
            root: self.root.clone(),
            prefix: prefix.to_string(),
            dirs: vec![self.root.clone()],
            current: None,
        };
        stream::try_unfold(walk, |mut walk| async move {
            let key = walk.next_key().await?;
            Ok::<_, StoreError>(key.map(|key| (key, walk)))
        })
        .boxed()
    }
}

/// Depth-first directory walk state for `iterate_keys`
struct Walk {
    root: PathBuf,
    prefix: String,
    dirs: Vec<PathBuf>,
    current: Option<ReadDir>,
}

impl Walk {
    async fn next_key(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(entries) = self.current.as_mut() {
                match entries.next_entry().await? {
                    Some(entry) => {
                        let path = entry.path();
                        if entry.file_type().await?.is_dir() {
                            if path != self.root.join(TEMP_DIR) {
                                self.dirs.push(path);
                            }
                            continue;
                        }
                        if let Some(key) = self.key_of(&path) {
                            if key.starts_with(&self.prefix) {
                                return Ok(Some(key));
                            }
                        }
                        continue;
                    }
                    None => self.current = None,
                }
            }

            let Some(dir) = self.dirs.pop() else {
                return Ok(None);
            };
            match fs::read_dir(&dir).await {
                Ok(entries) => self.current = Some(entries),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn key_of(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<&str> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}
