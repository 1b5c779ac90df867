#[macro_use]
extern crate tracing;

mod bilibili;
mod config;
mod downloader;
mod error;
mod storage;
mod utils;
mod workflow;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bilibili::StreamKind;
use crate::config::{Args, CONFIG_DIR, Command, Config};
use crate::downloader::Progress;
use crate::utils::init_logger;
use crate::utils::signal::terminate;
use crate::workflow::{DownloadEvent, Pipeline};

/// 收到终止信号后，等待当前命令清理临时文件的最长时间
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(&args.log_level);
    let token = CancellationToken::new();
    let command = run(args, token.clone());
    tokio::pin!(command);
    let res = tokio::select! {
        res = &mut command => res,
        signal = terminate() => {
            match signal {
                Ok(name) => warn!("收到 {} 信号，正在终止当前任务..", name),
                Err(e) => error!("监听终止信号失败：{}，终止当前任务..", e),
            }
            token.cancel();
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, command).await {
                Ok(res) => res,
                Err(_) => {
                    warn!("等待任务终止超时，强制退出");
                    return ExitCode::FAILURE;
                }
            }
        }
    };
    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("运行失败：{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args, token: CancellationToken) -> Result<()> {
    let config_dir = args.config_dir.unwrap_or_else(|| CONFIG_DIR.clone());
    let mut config = Config::load_or_init(&config_dir)?;
    if let Some(ffmpeg_path) = args.ffmpeg_path {
        config.download.ffmpeg_path = ffmpeg_path;
    }
    let pipeline = Pipeline::new(config, token)?;
    match args.command {
        Command::Crawl { keywords } => {
            pipeline.crawl(&keywords).await?;
        }
        Command::Merge { inputs, output } => {
            pipeline.merge(&inputs, output)?;
        }
        Command::Enrich { input, output } => {
            pipeline.enrich(input, output).await?;
        }
        Command::Run { keywords } => {
            pipeline.run(&keywords).await?;
        }
        Command::Download { bvid, dir } => download(pipeline, bvid, dir).await?,
    }
    Ok(())
}

/// 下载在单独的任务中执行，进度通过 channel 传回并由当前任务输出
async fn download(pipeline: Pipeline, bvid: String, dir: Option<PathBuf>) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
        pipeline
            .download(&bvid, dir, &move |event| {
                // 接收端只会在任务结束后关闭
                let _ = tx.send(event);
            })
            .await
    });
    let (mut video, mut audio) = (ProgressLog::default(), ProgressLog::default());
    while let Some(event) = rx.recv().await {
        match event {
            DownloadEvent::Resolved { title } => info!("开始下载「{}」", title),
            DownloadEvent::Progress { kind, progress } => match kind {
                StreamKind::Video => video.update(kind, progress),
                StreamKind::Audio => audio.update(kind, progress),
            },
            DownloadEvent::Merging => info!("音视频流下载完成，开始合并.."),
            DownloadEvent::Finished { path } => info!("下载完成：{}", path.display()),
        }
    }
    task.await??;
    Ok(())
}

/// 每前进 10% 输出一次进度，总大小未知时每 10 MiB 输出一次
#[derive(Default)]
struct ProgressLog {
    step: u64,
}

impl ProgressLog {
    const UNKNOWN_STEP_BYTES: u64 = 10 * 1024 * 1024;

    fn update(&mut self, kind: StreamKind, progress: Progress) {
        let step = match progress.total {
            0 => progress.downloaded / Self::UNKNOWN_STEP_BYTES,
            total => progress.downloaded * 10 / total,
        };
        if step <= self.step {
            return;
        }
        self.step = step;
        match progress.total {
            0 => info!("{} 流已下载 {} 字节", kind, progress.downloaded),
            total => info!(
                "{} 流已下载 {}%（{}/{} 字节）",
                kind,
                (step * 10).min(100),
                progress.downloaded,
                total
            ),
        }
    }
}
