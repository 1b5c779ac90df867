use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::utils::retry::{RetryAction, RetryError, RetryPolicy};

/// 以追加模式打开目标文件
#[async_trait]
pub trait Opener: Send + Sync {
    async fn open_append(&self, path: &Path) -> io::Result<File>;
}

pub struct FsOpener;

#[async_trait]
impl Opener for FsOpener {
    async fn open_append(&self, path: &Path) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Written,
    /// 文件持续被占用，重试耗尽后放弃了这一行
    GaveUp,
}

/// 逐行追加写入 CSV 文件，空文件会先写入表头
pub struct RecordWriter {
    opener: Box<dyn Opener>,
    policy: RetryPolicy,
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
    token: CancellationToken,
}

impl RecordWriter {
    pub fn new(policy: RetryPolicy, token: CancellationToken) -> Self {
        Self::with_opener(FsOpener, policy, token)
    }

    pub fn with_opener(opener: impl Opener + 'static, policy: RetryPolicy, token: CancellationToken) -> Self {
        Self {
            opener: Box::new(opener),
            policy,
            locks: DashMap::new(),
            token,
        }
    }

    /// 追加一行记录。文件被占用时按重试策略等待，重试耗尽只记录日志并返回 GaveUp
    pub async fn append<R: Serialize>(&self, path: &Path, record: &R) -> Result<AppendOutcome> {
        let row = encode(record, false)?;
        let with_header = encode(record, true)?;
        let lock = self.locks.entry(path.to_path_buf()).or_default().clone();
        let _guard = lock.lock().await;
        let (row, with_header) = (row.as_slice(), with_header.as_slice());
        let res = self
            .policy
            .run(&self.token, |_| async move {
                match self.write_once(path, row, with_header).await {
                    Ok(()) => RetryAction::Success(()),
                    Err(e) if is_contention(&e) => RetryAction::Retry(e),
                    Err(e) => RetryAction::Fail(e),
                }
            })
            .await;
        match res {
            Ok(()) => Ok(AppendOutcome::Written),
            Err(RetryError::Exhausted { attempts, last }) => {
                error!(
                    "文件 {} 持续被占用，尝试 {} 次后放弃写入：{}",
                    path.display(),
                    attempts,
                    last
                );
                Ok(AppendOutcome::GaveUp)
            }
            Err(RetryError::Failed(e)) => Err(e).with_context(|| format!("failed to append to {}", path.display())),
            Err(RetryError::Cancelled) => bail!("append to {} cancelled", path.display()),
        }
    }

    async fn write_once(&self, path: &Path, row: &[u8], with_header: &[u8]) -> io::Result<()> {
        let mut file = self.opener.open_append(path).await?;
        let content = if file.metadata().await?.len() == 0 {
            with_header
        } else {
            row
        };
        // 表头与数据行一次写入，不会出现只有表头的文件
        file.write_all(content).await?;
        file.flush().await
    }
}

fn encode<R: Serialize>(record: &R, has_headers: bool) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(has_headers)
        .from_writer(Vec::new());
    writer.serialize(record).context("failed to serialize record")?;
    writer.into_inner().map_err(|e| e.into_error().into())
}

/// 文件被其它进程锁定（例如在表格软件中打开）时出现的错误
fn is_contention(err: &io::Error) -> bool {
    if matches!(err.kind(), io::ErrorKind::PermissionDenied | io::ErrorKind::ResourceBusy) {
        return true;
    }
    // ERROR_SHARING_VIOLATION 与 ERROR_LOCK_VIOLATION
    #[cfg(windows)]
    if matches!(err.raw_os_error(), Some(32 | 33)) {
        return true;
    }
    false
}
