use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use async_tempfile::TempFile;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::{Method, header};
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::bilibili::Client;
use crate::config::DownloadOption;

/// 下载进度，total 为 0 表示服务端没有返回 Content-Length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub downloaded: u64,
    pub total: u64,
}

pub type ProgressFn<'a> = dyn Fn(Progress) + Send + Sync + 'a;

pub struct Downloader {
    client: Client,
    chunk_size: usize,
    ffmpeg_path: PathBuf,
    token: CancellationToken,
}

impl Downloader {
    // Downloader 使用带有默认 Header 的 Client 构建
    // 拿到 url 后下载文件不需要任何 cookie 作为身份凭证
    // 但如果不设置默认 Header，下载时会遇到 403 Forbidden 错误
    pub fn new(client: Client, option: &DownloadOption, token: CancellationToken) -> Self {
        Self {
            client,
            chunk_size: option.chunk_size.max(1),
            ffmpeg_path: PathBuf::from(&option.ffmpeg_path),
            token,
        }
    }

    pub async fn fetch(&self, url: &str, path: &Path, on_progress: &ProgressFn<'_>) -> Result<u64> {
        let resp = self
            .client
            .request(Method::GET, url)
            .send()
            .await?
            .error_for_status()?;
        let expected = resp.header_content_length();
        self.save(resp.bytes_stream().map_err(anyhow::Error::from), expected, path, on_progress)
            .await
    }

    /// 依次尝试每个地址，每次尝试都从新的临时文件开始
    pub async fn multi_fetch(&self, urls: &[&str], path: &Path, on_progress: &ProgressFn<'_>) -> Result<u64> {
        for (idx, url) in urls.iter().enumerate() {
            match self.fetch(url, path, on_progress).await {
                Ok(size) => return Ok(size),
                Err(e) if idx == urls.len() - 1 || self.token.is_cancelled() => {
                    return Err(e).with_context(|| format!("failed to download file from all {} urls", urls.len()));
                }
                Err(e) => warn!("从第 {}/{} 个地址下载失败，尝试下一个地址：{:#}", idx + 1, urls.len(), e),
            }
        }
        bail!("no urls provided");
    }

    /// 先将数据流写入临时文件，完整写入后才复制到目标路径，失败时目标路径不会出现残缺文件
    pub async fn save<S>(&self, stream: S, expected: Option<u64>, path: &Path, on_progress: &ProgressFn<'_>) -> Result<u64>
    where
        S: Stream<Item = Result<Bytes>>,
    {
        let mut temp_file = TempFile::new().await?;
        let size = match write_chunks(stream, &mut temp_file, expected, self.chunk_size, &self.token, on_progress).await
        {
            Ok(size) => size,
            Err(e) => {
                temp_file.drop_async().await;
                return Err(e);
            }
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let copied = fs::copy(temp_file.file_path(), path).await;
        // temp_file 的 drop 需要 std::fs::remove_file
        // 尽量主动调用，保证文件清除操作由 spawn_blocking 在专门线程中完成
        temp_file.drop_async().await;
        if let Err(e) = copied {
            let _ = fs::remove_file(path).await;
            return Err(e).with_context(|| format!("failed to copy download to {}", path.display()));
        }
        Ok(size)
    }

    /// 使用 ffmpeg 将音视频流合并为一个文件，不重新编码
    pub async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        let res = Command::new(&self.ffmpeg_path)
            .args(mux_args(video, audio, output))
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.ffmpeg_path.display()))?;
        if !res.status.success() {
            bail!(
                "ffmpeg exited with {}: {}",
                res.status,
                String::from_utf8_lossy(&res.stderr).trim()
            );
        }
        Ok(())
    }
}

pub fn mux_args<'a>(video: &'a Path, audio: &'a Path, output: &'a Path) -> [&'a OsStr; 8] {
    [
        OsStr::new("-y"),
        OsStr::new("-i"),
        video.as_os_str(),
        OsStr::new("-i"),
        audio.as_os_str(),
        OsStr::new("-c"),
        OsStr::new("copy"),
        output.as_os_str(),
    ]
}

/// 按 chunk_size 分块写入，每写入一块回调一次进度
pub async fn write_chunks<S, W>(
    stream: S,
    writer: &mut W,
    expected: Option<u64>,
    chunk_size: usize,
    token: &CancellationToken,
    on_progress: &ProgressFn<'_>,
) -> Result<u64>
where
    S: Stream<Item = Result<Bytes>>,
    W: AsyncWrite + Unpin,
{
    let mut stream = std::pin::pin!(stream);
    let total = expected.unwrap_or_default();
    let mut downloaded = 0u64;
    loop {
        let Some(next) = token.run_until_cancelled(stream.next()).await else {
            bail!("download cancelled after {} bytes", downloaded);
        };
        let Some(bytes) = next else {
            break;
        };
        for chunk in bytes?.chunks(chunk_size) {
            writer.write_all(chunk).await?;
            downloaded += chunk.len() as u64;
            on_progress(Progress { downloaded, total });
        }
    }
    writer.flush().await?;
    if let Some(expected) = expected {
        ensure!(
            downloaded == expected,
            "downloaded bytes mismatch: expected {}, got {}",
            expected,
            downloaded
        );
    }
    Ok(downloaded)
}

/// reqwest.content_length() 居然指的是 body_size 而非 content-length header，没办法自己实现一下
/// https://github.com/seanmonstar/reqwest/issues/1814
trait ResponseExt {
    fn header_content_length(&self) -> Option<u64>;
}

impl ResponseExt for reqwest::Response {
    fn header_content_length(&self) -> Option<u64> {
        self.headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
    }
}
