use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};

use dfs_protocol::ChunkReader;
use dfs_types::BlockId;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncRead, AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

use crate::error::{BlockError, BlockResult};

/// Block files on local disk, one plain file per block id under `root`.
///
/// Block ids are validated at construction (no separators, no `.`/`..`),
/// so joining one onto `root` never escapes it.
#[derive(Debug, Clone)]
pub struct BlockStore {
    root: PathBuf,
}

fn not_found(block: &BlockId) -> impl FnOnce(std::io::Error) -> BlockError + '_ {
    move |e| {
        if e.kind() == ErrorKind::NotFound {
            BlockError::NotFound(block.to_string())
        } else {
            BlockError::Io(e)
        }
    }
}

impl BlockStore {
    pub async fn open(root: impl Into<PathBuf>) -> BlockResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, block: &BlockId) -> PathBuf {
        self.root.join(block.as_str())
    }

    /// Create an empty block, truncating any previous content.
    pub async fn create(&self, block: &BlockId) -> BlockResult<()> {
        File::create(self.path_of(block)).await?;
        debug!(block = %block, "block created");
        Ok(())
    }

    /// Replace the block's content with `data`.
    pub async fn write_all(&self, block: &BlockId, data: &[u8]) -> BlockResult<u64> {
        let mut file = File::create(self.path_of(block)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(data.len() as u64)
    }

    /// Replace the block's content with a chunk stream read from `r`.
    ///
    /// The stream is always consumed to its terminator, even after a local
    /// write failure, so the connection stays in sync.
    pub async fn write_stream<R>(&self, block: &BlockId, r: &mut R) -> BlockResult<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut file = File::create(self.path_of(block)).await;
        let mut chunks = ChunkReader::new(r);
        let mut written = 0u64;
        let mut failure: Option<std::io::Error> = None;

        while let Some(chunk) = chunks.next_chunk().await? {
            if failure.is_some() {
                continue;
            }
            if let Ok(f) = &mut file {
                match f.write_all(&chunk).await {
                    Ok(()) => written += chunk.len() as u64,
                    Err(e) => failure = Some(e),
                }
            }
        }

        let mut file = file?;
        if let Some(e) = failure {
            return Err(e.into());
        }
        file.flush().await?;
        debug!(block = %block, bytes = written, "block written");
        Ok(written)
    }

    /// Open the block positioned at `offset`.
    pub async fn open_at(&self, block: &BlockId, offset: i64) -> BlockResult<File> {
        let offset = u64::try_from(offset)
            .map_err(|_| BlockError::InvalidArgument(format!("negative offset {offset}")))?;
        let mut file = File::open(self.path_of(block)).await.map_err(not_found(block))?;
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(file)
    }

    pub async fn read_all(&self, block: &BlockId) -> BlockResult<Vec<u8>> {
        fs::read(self.path_of(block)).await.map_err(not_found(block))
    }

    pub async fn delete(&self, block: &BlockId) -> BlockResult<()> {
        fs::remove_file(self.path_of(block)).await.map_err(not_found(block))?;
        debug!(block = %block, "block deleted");
        Ok(())
    }

    /// Copy `src` into `dst`, replacing any existing `dst`.
    pub async fn copy(&self, src: &BlockId, dst: &BlockId) -> BlockResult<u64> {
        let n = fs::copy(self.path_of(src), self.path_of(dst))
            .await
            .map_err(not_found(src))?;
        debug!(src = %src, dst = %dst, bytes = n, "block copied");
        Ok(n)
    }

    /// Rename `src` to `dst`. Fails if `dst` already exists.
    pub async fn rename(&self, src: &BlockId, dst: &BlockId) -> BlockResult<()> {
        if self.exists(dst).await? {
            return Err(BlockError::AlreadyExists(dst.to_string()));
        }
        fs::rename(self.path_of(src), self.path_of(dst))
            .await
            .map_err(not_found(src))?;
        debug!(src = %src, dst = %dst, "block renamed");
        Ok(())
    }

    pub async fn size(&self, block: &BlockId) -> BlockResult<i64> {
        let meta = fs::metadata(self.path_of(block)).await.map_err(not_found(block))?;
        Ok(meta.len() as i64)
    }

    pub async fn exists(&self, block: &BlockId) -> BlockResult<bool> {
        Ok(fs::try_exists(self.path_of(block)).await?)
    }
}
