use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::default::{default_merged_file, default_output_dir, default_video_file};
use crate::utils::retry::RetryPolicy;

/// 每个请求都会携带的 header，以及请求超时设置
#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RequestOption {
    /// 为空时随机生成一个 Chrome 的 User-Agent
    pub user_agent: Option<String>,
    pub referer: String,
    pub origin: String,
    /// 静态 Cookie，原样放入请求头
    pub cookie: Option<String>,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for RequestOption {
    fn default() -> Self {
        Self {
            user_agent: None,
            referer: "https://www.bilibili.com".to_owned(),
            origin: "https://www.bilibili.com".to_owned(),
            cookie: None,
            connect_timeout_secs: 10,
            read_timeout_secs: 30,
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
pub struct RateLimit {
    pub limit: usize,
    pub duration: u64,
}

/// 请求间隔相关的配置
#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PaceOption {
    /// 每次接口请求成功后固定等待的时间
    pub api_interval_ms: u64,
    /// 每爬取完一页搜索结果后等待的时间
    pub page_interval_ms: u64,
    /// 全局限流，多个 worker 共享
    pub rate_limit: Option<RateLimit>,
}

impl PaceOption {
    pub fn api_interval(&self) -> Duration {
        Duration::from_millis(self.api_interval_ms)
    }

    pub fn page_interval(&self) -> Duration {
        Duration::from_millis(self.page_interval_ms)
    }
}

impl Default for PaceOption {
    fn default() -> Self {
        Self {
            api_interval_ms: 1500,
            page_interval_ms: 1000,
            rate_limit: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RetryOption {
    /// 写入文件被占用时的重试策略
    pub writer: RetryPolicy,
    /// 接口请求遇到网络错误时的重试策略，默认不重试
    pub api: RetryPolicy,
}

impl Default for RetryOption {
    fn default() -> Self {
        Self {
            writer: RetryPolicy::fixed(50, Duration::from_secs(3)),
            api: RetryPolicy::fixed(1, Duration::from_secs(1)),
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CrawlOption {
    /// 搜索结果最多只展示 42 页
    pub max_page: u32,
    pub output_dir: PathBuf,
    /// 合并去重后的 BV 号文件名，位于 output_dir 下
    pub merged_file: String,
}

impl Default for CrawlOption {
    fn default() -> Self {
        Self {
            max_page: 42,
            output_dir: default_output_dir(),
            merged_file: default_merged_file(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EnrichOption {
    pub concurrency: usize,
    /// 是否在一次运行中缓存 UP 主信息，避免重复请求同一个 UP 主
    pub cache_owner: bool,
    /// 视频信息的输出文件名，位于 crawl.output_dir 下
    pub output_file: String,
}

impl Default for EnrichOption {
    fn default() -> Self {
        Self {
            concurrency: 1,
            cache_owner: false,
            output_file: default_video_file(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DownloadOption {
    pub chunk_size: usize,
    pub ffmpeg_path: String,
    pub output_dir: PathBuf,
    /// 合并完成后是否保留单独的音频、视频流文件
    pub keep_streams: bool,
}

impl Default for DownloadOption {
    fn default() -> Self {
        Self {
            chunk_size: 8 * 1024,
            ffmpeg_path: "ffmpeg".to_owned(),
            output_dir: default_output_dir(),
            keep_streams: true,
        }
    }
}
