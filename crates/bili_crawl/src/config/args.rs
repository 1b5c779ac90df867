use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "Bili-Crawl", version, about, long_about = None)]
pub struct Args {
    #[arg(short, long, default_value = "None,bili_crawl=info", env = "RUST_LOG", global = true)]
    pub log_level: String,

    #[arg(short, long, env = "BILI_CRAWL_CONFIG_DIR", global = true)]
    pub config_dir: Option<PathBuf>,

    #[arg(short, long, env = "BILI_CRAWL_FFMPEG_PATH", global = true)]
    pub ffmpeg_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// 按关键词遍历搜索结果页，将 BV 号写入 `<关键词>BV号.csv`
    Crawl {
        #[arg(required = true)]
        keywords: Vec<String>,
    },
    /// 合并多个 BV 号文件并去重
    Merge {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 获取视频与 UP 主信息，计算传播效果指数后写入文件
    Enrich {
        input: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 依次执行 crawl、merge 和 enrich
    Run {
        #[arg(required = true)]
        keywords: Vec<String>,
    },
    /// 下载单个视频的音视频流并合并
    Download {
        bvid: String,
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}
