use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use dashmap::DashMap;
use futures::StreamExt;
use tokio::fs;
use tokio_util::sync::CancellationToken;

use crate::bilibili::{BiliClient, MetadataSource, OwnerSummary, PageFetcher, PlayManifest, Search, StreamKind};
use crate::config::Config;
use crate::downloader::{Downloader, Progress};
use crate::error::ExecutionStatus;
use crate::storage::{AppendOutcome, BvidRow, MergeSummary, RecordWriter, VideoRecord, merge_stores, read_bvids};
use crate::utils::filenamify::title_to_filename;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CrawlSummary {
    pub pages: u32,
    pub failed_pages: u32,
    pub written: usize,
    pub gave_up: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EnrichSummary {
    pub succeeded: usize,
    pub gave_up: usize,
    pub ignored: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub enum DownloadEvent {
    Resolved { title: String },
    Progress { kind: StreamKind, progress: Progress },
    Merging,
    Finished { path: PathBuf },
}

pub type EventFn<'a> = dyn Fn(DownloadEvent) + Send + Sync + 'a;

/// 遍历关键词的搜索结果，每个 BV 号立即追加到 path 中。单页失败只记录日志
pub async fn crawl_keyword(
    fetcher: &dyn PageFetcher,
    writer: &RecordWriter,
    keyword: &str,
    path: &Path,
    max_page: u32,
    page_interval: Duration,
) -> Result<CrawlSummary> {
    info!("开始爬取关键词「{}」的搜索结果..", keyword);
    let mut summary = CrawlSummary::default();
    let mut pages = Box::pin(Search::new(fetcher, keyword.to_owned(), max_page, page_interval).into_page_stream());
    while let Some(page) = pages.next().await {
        summary.pages += 1;
        let page = match page {
            Ok(page) => page,
            Err(e) => {
                summary.failed_pages += 1;
                error!("{:#}", e);
                continue;
            }
        };
        if page.bvids.is_empty() {
            debug!("关键词「{}」第 {} 页没有视频", keyword, page.page);
        }
        for bvid in page.bvids {
            match writer.append(path, &BvidRow { bvid }).await? {
                AppendOutcome::Written => summary.written += 1,
                AppendOutcome::GaveUp => summary.gave_up += 1,
            }
        }
    }
    info!(
        "关键词「{}」爬取完成，共 {} 页（失败 {} 页），写入 {} 个 BV 号",
        keyword, summary.pages, summary.failed_pages, summary.written
    );
    Ok(summary)
}

/// 为 BV 号补充视频信息与 UP 主信息，计算传播效果指数后写入文件
pub struct Aggregator<'a> {
    source: &'a dyn MetadataSource,
    writer: &'a RecordWriter,
    owners: Option<DashMap<i64, OwnerSummary>>,
}

impl<'a> Aggregator<'a> {
    pub fn new(source: &'a dyn MetadataSource, writer: &'a RecordWriter, cache_owner: bool) -> Self {
        Self {
            source,
            writer,
            owners: cache_owner.then(DashMap::new),
        }
    }

    pub async fn enrich(&self, bvid: &str) -> Result<VideoRecord> {
        let view = self.source.video_view(bvid).await?;
        let owner = self.owner_summary(view.owner.mid).await?;
        VideoRecord::compose(view, owner).with_context(|| format!("failed to compose record of {}", bvid))
    }

    async fn owner_summary(&self, mid: i64) -> Result<OwnerSummary> {
        if let Some(summary) = self.owners.as_ref().and_then(|owners| owners.get(&mid).map(|s| *s)) {
            return Ok(summary);
        }
        let summary = self.source.owner_summary(mid).await?;
        if let Some(owners) = &self.owners {
            owners.insert(mid, summary);
        }
        Ok(summary)
    }

    pub async fn process(&self, bvid: &str, path: &Path) -> ExecutionStatus {
        let res = async {
            let record = self.enrich(bvid).await?;
            self.writer.append(path, &record).await
        }
        .await;
        res.into()
    }

    /// 逐个处理 BV 号，单个失败不影响其它 BV 号
    pub async fn enrich_all(&self, bvids: &[String], path: &Path, concurrency: usize) -> EnrichSummary {
        let mut summary = EnrichSummary::default();
        let mut tasks = futures::stream::iter(bvids)
            .map(|bvid| async move { (bvid, self.process(bvid, path).await) })
            .buffer_unordered(concurrency.max(1));
        while let Some((bvid, status)) = tasks.next().await {
            match status {
                ExecutionStatus::Succeeded => {
                    summary.succeeded += 1;
                    debug!("视频 {} 处理成功", bvid);
                }
                ExecutionStatus::GaveUp => summary.gave_up += 1,
                ExecutionStatus::Ignored(e) => {
                    summary.ignored += 1;
                    warn!("跳过视频 {}：{:#}", bvid, e);
                }
                ExecutionStatus::Failed(e) => {
                    summary.failed += 1;
                    error!("处理视频 {} 失败：{:#}", bvid, e);
                }
            }
        }
        summary
    }
}

/// 解析视频页面，并发下载音视频流后使用 ffmpeg 合并，返回合并后的文件路径
pub async fn download_video(
    fetcher: &dyn PageFetcher,
    downloader: &Downloader,
    bvid: &str,
    dir: &Path,
    keep_streams: bool,
    on_event: &EventFn<'_>,
) -> Result<PathBuf> {
    let manifest = PlayManifest::resolve(fetcher, bvid).await?;
    let name = title_to_filename(&manifest.title, bvid);
    on_event(DownloadEvent::Resolved {
        title: manifest.title.clone(),
    });
    fs::create_dir_all(dir).await?;
    let video_path = dir.join(format!("{}_video.m4s", name));
    let audio_path = dir.join(format!("{}_audio.m4s", name));
    let output = dir.join(format!("{}.mp4", name));
    fetch_streams(downloader, &manifest, &video_path, &audio_path, on_event)
        .await
        .with_context(|| format!("failed to download streams of {}", bvid))?;
    on_event(DownloadEvent::Merging);
    if let Err(e) = downloader.merge(&video_path, &audio_path, &output).await {
        remove_files(&[output.as_path()]).await;
        return Err(e).with_context(|| format!("failed to merge streams of {}", bvid));
    }
    if !keep_streams {
        remove_files(&[video_path.as_path(), audio_path.as_path()]).await;
    }
    on_event(DownloadEvent::Finished { path: output.clone() });
    Ok(output)
}

/// 同时下载音视频流，等两者都结束后再处理结果，任意一个失败时两个文件都会被删除
async fn fetch_streams(
    downloader: &Downloader,
    manifest: &PlayManifest,
    video_path: &Path,
    audio_path: &Path,
    on_event: &EventFn<'_>,
) -> Result<()> {
    let (video_urls, audio_urls) = (manifest.video.candidates(), manifest.audio.candidates());
    let on_video = |progress: Progress| {
        on_event(DownloadEvent::Progress {
            kind: StreamKind::Video,
            progress,
        })
    };
    let on_audio = |progress: Progress| {
        on_event(DownloadEvent::Progress {
            kind: StreamKind::Audio,
            progress,
        })
    };
    // 两个流都结束后才清理，此时不会再有写入目标文件的操作
    let (video, audio) = tokio::join!(
        downloader.multi_fetch(&video_urls, video_path, &on_video),
        downloader.multi_fetch(&audio_urls, audio_path, &on_audio)
    );
    if let Err(e) = video.and(audio) {
        remove_files(&[video_path, audio_path]).await;
        return Err(e);
    }
    Ok(())
}

async fn remove_files(paths: &[&Path]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!("删除文件 {} 失败：{}", path.display(), e);
        }
    }
}

/// 命令行各个子命令的入口
pub struct Pipeline {
    client: BiliClient,
    writer: RecordWriter,
    downloader: Downloader,
    config: Config,
}

impl Pipeline {
    pub fn new(config: Config, token: CancellationToken) -> Result<Self> {
        let client = BiliClient::new(&config.request, &config.pace, config.retry.api.clone(), token.clone())?;
        let writer = RecordWriter::new(config.retry.writer.clone(), token.clone());
        let downloader = Downloader::new(client.client.clone(), &config.download, token);
        Ok(Self {
            client,
            writer,
            downloader,
            config,
        })
    }

    /// 依次爬取每个关键词，返回成功爬取的输出文件
    pub async fn crawl(&self, keywords: &[String]) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.config.crawl.output_dir).await?;
        let mut outputs = Vec::with_capacity(keywords.len());
        for keyword in keywords {
            let path = self.config.keyword_path(keyword);
            match crawl_keyword(
                &self.client.client,
                &self.writer,
                keyword,
                &path,
                self.config.crawl.max_page,
                self.config.pace.page_interval(),
            )
            .await
            {
                Ok(_) => outputs.push(path),
                Err(e) => error!("爬取关键词「{}」时遇到错误：{:#}", keyword, e),
            }
        }
        Ok(outputs)
    }

    pub fn merge(&self, inputs: &[PathBuf], output: Option<PathBuf>) -> Result<MergeSummary> {
        let output = output.unwrap_or_else(|| self.config.merged_path());
        let summary = merge_stores(inputs, &output)?;
        info!(
            "合并 {} 个文件到 {}，共 {} 行，去重后 {} 个 BV 号",
            summary.inputs,
            output.display(),
            summary.rows,
            summary.unique
        );
        Ok(summary)
    }

    pub async fn enrich(&self, input: Option<PathBuf>, output: Option<PathBuf>) -> Result<EnrichSummary> {
        let input = input.unwrap_or_else(|| self.config.merged_path());
        let output = output.unwrap_or_else(|| self.config.video_path());
        let bvids = read_bvids(&input)?;
        info!("从 {} 读取到 {} 个 BV 号，开始获取视频信息..", input.display(), bvids.len());
        let aggregator = Aggregator::new(&self.client, &self.writer, self.config.enrich.cache_owner);
        let summary = aggregator
            .enrich_all(&bvids, &output, self.config.enrich.concurrency)
            .await;
        info!(
            "视频信息获取完成：成功 {}，放弃写入 {}，跳过 {}，失败 {}",
            summary.succeeded, summary.gave_up, summary.ignored, summary.failed
        );
        Ok(summary)
    }

    /// 爬取、合并、获取视频信息依次执行
    pub async fn run(&self, keywords: &[String]) -> Result<EnrichSummary> {
        let crawled = self.crawl(keywords).await?;
        let inputs = crawled.into_iter().filter(|path| path.exists()).collect::<Vec<_>>();
        if inputs.is_empty() {
            bail!("没有爬取到任何 BV 号");
        }
        self.merge(&inputs, None)?;
        self.enrich(None, None).await
    }

    pub async fn download(&self, bvid: &str, dir: Option<PathBuf>, on_event: &EventFn<'_>) -> Result<PathBuf> {
        let dir = dir.unwrap_or_else(|| self.config.download.output_dir.clone());
        download_video(
            &self.client.client,
            &self.downloader,
            bvid,
            &dir,
            self.config.download.keep_streams,
            on_event,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use anyhow::anyhow;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use chrono::DateTime;

    use super::*;
    use crate::bilibili::video::{Owner, Stat};
    use crate::bilibili::{BiliError, VideoView};
    use crate::config::DownloadOption;
    use crate::utils::http_stub::{HttpStub, Response};
    use crate::utils::retry::RetryPolicy;

    struct FakeSource {
        views: HashMap<&'static str, Stat>,
        owner_calls: AtomicU32,
    }

    impl FakeSource {
        fn new(views: &[(&'static str, Stat)]) -> Self {
            Self {
                views: views.iter().copied().collect(),
                owner_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl MetadataSource for FakeSource {
        async fn video_view(&self, bvid: &str) -> Result<VideoView> {
            let stat = *self
                .views
                .get(bvid)
                .ok_or_else(|| BiliError::ErrorResponse(-404, "啥都木有".to_owned()))?;
            Ok(VideoView {
                bvid: bvid.to_owned(),
                aid: 1,
                cid: 2,
                owner: Owner {
                    mid: 42,
                    name: "某 UP 主".to_owned(),
                },
                title: format!("标题 {}", bvid),
                tname: "单机游戏".to_owned(),
                pubdate: DateTime::from_timestamp(1577808000, 0).unwrap(),
                desc: String::new(),
                stat,
            })
        }

        async fn owner_summary(&self, _mid: i64) -> Result<OwnerSummary> {
            self.owner_calls.fetch_add(1, Ordering::SeqCst);
            Ok(OwnerSummary {
                follower: 10086,
                archive: 233,
            })
        }
    }

    fn stat(view: i64) -> Stat {
        Stat {
            view,
            like: 10,
            coin: 5,
            favorite: 5,
            share: 1,
            reply: 2,
            danmaku: 3,
        }
    }

    fn writer() -> RecordWriter {
        RecordWriter::new(RetryPolicy::fixed(3, Duration::ZERO), CancellationToken::new())
    }

    fn line_count(path: &Path) -> usize {
        std::fs::read_to_string(path).map(|s| s.lines().count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_enrich_all_continues_after_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("视频基本信息.csv");
        let source = FakeSource::new(&[("BV1a", stat(100)), ("BV1zero", Stat::default()), ("BV1c", stat(300))]);
        let writer = writer();
        let aggregator = Aggregator::new(&source, &writer, false);
        let bvids = ["BV1a", "BV1missing", "BV1zero", "BV1c"].map(str::to_owned);
        let summary = aggregator.enrich_all(&bvids, &path, 1).await;
        assert_eq!(
            summary,
            EnrichSummary {
                succeeded: 2,
                gave_up: 0,
                ignored: 1,
                failed: 1
            }
        );
        assert_eq!(line_count(&path), 3);
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let records = reader.deserialize::<VideoRecord>().collect::<Result<Vec<_>, _>>().unwrap();
        assert_eq!(records[0].bvid, "BV1a");
        assert_eq!(records[1].bvid, "BV1c");
        assert!((records[0].communication_index - 57f64.ln()).abs() < 1e-9);
        assert_eq!(source.owner_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_owner_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let bvids = ["BV1a", "BV1b", "BV1c"].map(str::to_owned);
        let views = [("BV1a", stat(1)), ("BV1b", stat(2)), ("BV1c", stat(3))];

        let source = FakeSource::new(&views);
        let writer = writer();
        let summary = Aggregator::new(&source, &writer, true).enrich_all(&bvids, &path, 1).await;
        assert_eq!(summary.succeeded, 3);
        assert_eq!(source.owner_calls.load(Ordering::SeqCst), 1);

        let source = FakeSource::new(&views);
        Aggregator::new(&source, &writer, false).enrich_all(&bvids, &path, 1).await;
        assert_eq!(source.owner_calls.load(Ordering::SeqCst), 3);
        assert_eq!(line_count(&path), 7);
    }

    /// 第 2 页请求失败，其余页返回相同的结果
    struct Listing;

    #[async_trait]
    impl PageFetcher for Listing {
        async fn fetch(&self, url: &str) -> Result<String> {
            if url.ends_with("page=2") {
                return Err(anyhow!("HTTP status server error (502 Bad Gateway)"));
            }
            Ok(["BV1GJ411x7h7", "BV1uT4y1P7CX", "BV1GJ411x7h7"]
                .iter()
                .map(|bvid| {
                    format!(
                        r#"<div class="bili-video-card"><a href="//www.bilibili.com/video/{}/"></a></div>"#,
                        bvid
                    )
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_crawl_keyword() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("暗区突围BV号.csv");
        let writer = writer();
        let summary = crawl_keyword(&Listing, &writer, "暗区突围", &path, 3, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(
            summary,
            CrawlSummary {
                pages: 3,
                failed_pages: 1,
                written: 4,
                gave_up: 0
            }
        );
        // 跨页重复留给合并处理
        assert_eq!(line_count(&path), 5);
        assert_eq!(read_bvids(&path).unwrap(), vec!["BV1GJ411x7h7", "BV1uT4y1P7CX"]);
    }

    /// 视频页面中没有播放信息
    struct EmptyPage;

    #[async_trait]
    impl PageFetcher for EmptyPage {
        async fn fetch(&self, _url: &str) -> Result<String> {
            Ok("<html></html>".to_owned())
        }
    }

    #[tokio::test]
    async fn test_download_without_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let client = crate::bilibili::Client::new(&Default::default()).unwrap();
        let downloader = Downloader::new(client, &Default::default(), CancellationToken::new());
        let events = Mutex::new(Vec::new());
        let err = download_video(&EmptyPage, &downloader, "BV1a", dir.path(), true, &|e| {
            events.lock().unwrap().push(e)
        })
        .await
        .unwrap_err();
        assert!(matches!(err.downcast_ref::<BiliError>(), Some(BiliError::ManifestNotFound(_))));
        assert!(events.into_inner().unwrap().is_empty());
    }

    /// 视频页面中的播放地址指向本地服务
    struct StubPage {
        video: String,
        audio: String,
    }

    #[async_trait]
    impl PageFetcher for StubPage {
        async fn fetch(&self, _url: &str) -> Result<String> {
            Ok(format!(
                r#"<html><head><meta property="og:title" content="测试/视频"></head><body><script>window.__playinfo__={{"data":{{"dash":{{"video":[{{"baseUrl":"{}"}}],"audio":[{{"baseUrl":"{}"}}]}}}}}}</script></body></html>"#,
                self.video, self.audio
            ))
        }
    }

    fn stub_downloader(ffmpeg_path: &str) -> Downloader {
        let option = DownloadOption {
            ffmpeg_path: ffmpeg_path.to_owned(),
            ..Default::default()
        };
        let client = crate::bilibili::Client::new(&Default::default()).unwrap();
        Downloader::new(client, &option, CancellationToken::new())
    }

    fn stub_server() -> impl Fn(&str) -> Response + Send + Sync + 'static {
        |path| match path {
            "/video.m4s" => Response::bytes(vec![1u8; 64 * 1024]),
            "/audio.m4s" => Response::bytes(vec![2u8; 1024 * 1024]),
            _ => Response::status(StatusCode::NOT_FOUND),
        }
    }

    fn file_names(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_failed_stream_cleans_up_both() {
        let stub = HttpStub::start(stub_server()).await;
        let dir = tempfile::tempdir().unwrap();
        let page = StubPage {
            video: stub.url("/missing.m4s"),
            audio: stub.url("/audio.m4s"),
        };
        let events = Mutex::new(Vec::new());
        let err = download_video(&page, &stub_downloader("true"), "BV1GJ411x7h7", dir.path(), true, &|e| {
            events.lock().unwrap().push(e)
        })
        .await
        .unwrap_err();
        assert!(format!("{:#}", err).contains("404"));
        // 音频流下载成功，但视频流失败后两个文件都不应该保留
        assert!(file_names(dir.path()).is_empty());
        let events = events.into_inner().unwrap();
        assert!(matches!(&events[0], DownloadEvent::Resolved { title } if title == "测试/视频"));
        assert!(events.iter().any(|e| matches!(
            e,
            DownloadEvent::Progress {
                kind: StreamKind::Audio,
                ..
            }
        )));
        assert!(!events.iter().any(|e| matches!(e, DownloadEvent::Merging)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_download_video_with_stub() {
        let stub = HttpStub::start(stub_server()).await;
        let dir = tempfile::tempdir().unwrap();
        let page = StubPage {
            video: stub.url("/video.m4s"),
            audio: stub.url("/audio.m4s"),
        };
        // 使用 true 代替 ffmpeg，只验证合并前后的流程
        let downloader = stub_downloader("true");
        let events = Mutex::new(Vec::new());
        let output = download_video(&page, &downloader, "BV1GJ411x7h7", dir.path(), true, &|e| {
            events.lock().unwrap().push(e)
        })
        .await
        .unwrap();
        assert_eq!(output, dir.path().join("测试_视频.mp4"));
        assert_eq!(
            std::fs::metadata(dir.path().join("测试_视频_video.m4s")).unwrap().len(),
            64 * 1024
        );
        assert_eq!(
            std::fs::metadata(dir.path().join("测试_视频_audio.m4s")).unwrap().len(),
            1024 * 1024
        );
        let events = events.into_inner().unwrap();
        assert!(matches!(events.last(), Some(DownloadEvent::Finished { path }) if *path == output));

        // 不保留音视频流时，合并完成后删除
        let output = download_video(&page, &downloader, "BV1GJ411x7h7", dir.path(), false, &|_| {})
            .await
            .unwrap();
        assert_eq!(output, dir.path().join("测试_视频.mp4"));
        assert!(file_names(dir.path()).is_empty());
    }

    #[ignore = "only for manual test"]
    #[tokio::test]
    async fn test_download_video() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(Config::default(), CancellationToken::new()).unwrap();
        let path = pipeline
            .download("BV1GJ411x7h7", Some(dir.path().to_path_buf()), &|e| println!("{:?}", e))
            .await
            .unwrap();
        assert!(path.exists());
    }
}
