use anyhow::{Context, Result};
use serde::Deserialize;

use crate::bilibili::error::BiliError;
use crate::bilibili::{PageFetcher, extract};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
}

/// 单条流的下载地址，主地址失败时依次尝试备用地址
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamUrls {
    pub url: String,
    pub backup: Vec<String>,
}

impl StreamUrls {
    pub fn candidates(&self) -> Vec<&str> {
        std::iter::once(self.url.as_str())
            .chain(self.backup.iter().map(String::as_str))
            .collect()
    }
}

/// 从视频页面中解析出的播放信息，音频与视频是分离的
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayManifest {
    pub title: String,
    pub video: StreamUrls,
    pub audio: StreamUrls,
}

#[derive(Deserialize)]
struct PlayInfo {
    data: PlayData,
}

#[derive(Deserialize)]
struct PlayData {
    dash: Dash,
}

#[derive(Deserialize)]
struct Dash {
    video: Option<Vec<DashStream>>,
    audio: Option<Vec<DashStream>>,
}

// 页面中 baseUrl 与 base_url 两种写法可能同时存在，也可能只有其中一种
// 分开声明为两个字段，alias 在两者同时出现时会报重复字段
#[derive(Deserialize)]
struct DashStream {
    #[serde(rename = "baseUrl", default)]
    base_url_camel: Option<String>,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(rename = "backupUrl", default)]
    backup_url_camel: Option<Vec<String>>,
    #[serde(default)]
    backup_url: Option<Vec<String>>,
}

impl DashStream {
    fn into_urls(self) -> Option<StreamUrls> {
        let url = self.base_url_camel.or(self.base_url).filter(|url| !url.is_empty())?;
        Some(StreamUrls {
            url,
            backup: self.backup_url_camel.or(self.backup_url).unwrap_or_default(),
        })
    }
}

pub fn video_page_url(bvid: &str) -> String {
    format!("https://www.bilibili.com/video/{}", bvid)
}

impl PlayManifest {
    /// 请求视频页面并解析播放信息
    pub async fn resolve(fetcher: &dyn PageFetcher, bvid: &str) -> Result<Self> {
        let html = fetcher
            .fetch(&video_page_url(bvid))
            .await
            .with_context(|| format!("failed to fetch video page of {}", bvid))?;
        Ok(Self::parse(bvid, &html)?)
    }

    pub fn parse(bvid: &str, html: &str) -> Result<Self, BiliError> {
        let title = extract::meta_property(html, "og:title")
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| bvid.to_owned());
        let blob = extract::play_info_blob(html).ok_or_else(|| BiliError::ManifestNotFound(bvid.to_owned()))?;
        let play_info: PlayInfo = serde_json::from_str(blob).map_err(|source| BiliError::ManifestMalformed {
            bvid: bvid.to_owned(),
            source,
        })?;
        let Dash { video, audio } = play_info.data.dash;
        let first = |streams: Option<Vec<DashStream>>, kind| {
            streams
                .and_then(|streams| streams.into_iter().find_map(DashStream::into_urls))
                .ok_or_else(|| BiliError::StreamsEmpty {
                    bvid: bvid.to_owned(),
                    kind,
                })
        };
        Ok(Self {
            title,
            video: first(video, StreamKind::Video)?,
            audio: first(audio, StreamKind::Audio)?,
        })
    }
}
