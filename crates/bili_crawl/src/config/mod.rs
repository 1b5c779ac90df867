use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

mod args;
mod default;
mod item;

pub use crate::config::args::{Args, Command};
pub use crate::config::default::keyword_file;
pub use crate::config::item::{
    CrawlOption, DownloadOption, EnrichOption, PaceOption, RateLimit, RequestOption, RetryOption,
};

/// 默认的配置文件夹，可以通过命令行参数覆盖
pub static CONFIG_DIR: LazyLock<PathBuf> =
    LazyLock::new(|| dirs::config_dir().expect("No config path found").join("bili-crawl"));

#[derive(Serialize, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub request: RequestOption,
    pub pace: PaceOption,
    pub retry: RetryOption,
    pub crawl: CrawlOption,
    pub enrich: EnrichOption,
    pub download: DownloadOption,
}

impl Config {
    /// 读取配置文件，文件不存在时使用默认配置。读取后会将完整配置写回，方便用户修改
    pub fn load_or_init(config_dir: &Path) -> Result<Self> {
        info!("开始加载配置文件..");
        let config = match Self::load(config_dir) {
            Ok(config) => config,
            Err(err)
                if err
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound) =>
            {
                warn!("配置文件不存在，使用默认配置..");
                Self::default()
            }
            Err(err) => return Err(err),
        };
        config.save(config_dir).context("保存配置文件时遇到错误")?;
        info!("检查配置文件..");
        config.check()?;
        info!("配置文件检查通过");
        Ok(config)
    }

    fn load(config_dir: &Path) -> Result<Self> {
        let config_content = std::fs::read_to_string(config_dir.join("config.toml"))?;
        Ok(toml::from_str(&config_content)?)
    }

    pub fn save(&self, config_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(config_dir)?;
        std::fs::write(config_dir.join("config.toml"), toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn check(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.request.referer.is_empty() {
            errors.push("request.referer 不能为空");
        }
        if self.request.connect_timeout_secs == 0 || self.request.read_timeout_secs == 0 {
            errors.push("请求超时时间必须大于 0");
        }
        if self.pace.rate_limit.as_ref().is_some_and(|r| r.limit == 0 || r.duration == 0) {
            errors.push("rate_limit 的 limit 和 duration 必须大于 0");
        }
        if self.retry.writer.max_attempts == 0 || self.retry.api.max_attempts == 0 {
            errors.push("重试策略的 max_attempts 必须大于 0");
        }
        if self.crawl.max_page == 0 {
            errors.push("crawl.max_page 必须大于 0");
        }
        if self.crawl.merged_file.is_empty() || self.enrich.output_file.is_empty() {
            errors.push("输出文件名不能为空");
        }
        if self.crawl.merged_file == self.enrich.output_file {
            errors.push("合并文件与视频信息文件不能是同一个文件");
        }
        if self.enrich.concurrency == 0 {
            errors.push("enrich.concurrency 必须大于 0");
        }
        if self.download.chunk_size == 0 {
            errors.push("download.chunk_size 必须大于 0");
        }
        if self.download.ffmpeg_path.is_empty() {
            errors.push("未设置 ffmpeg 路径");
        }
        if !errors.is_empty() {
            bail!("配置文件不合法：\n{}", errors.join("\n"));
        }
        Ok(())
    }

    pub fn merged_path(&self) -> PathBuf {
        self.crawl.output_dir.join(&self.crawl.merged_file)
    }

    pub fn video_path(&self) -> PathBuf {
        self.crawl.output_dir.join(&self.enrich.output_file)
    }

    pub fn keyword_path(&self, keyword: &str) -> PathBuf {
        self.crawl.output_dir.join(keyword_file(keyword))
    }
}
