use anyhow::{Result, bail, ensure};
use async_trait::async_trait;
pub use client::{BiliClient, Client, PageFetcher};
pub use error::BiliError;
pub use manifest::{PlayManifest, StreamKind};
pub use search::Search;
pub use upper::{OwnerSummary, Upper};
pub use video::{Video, VideoView};

mod client;
mod error;
pub mod extract;
mod manifest;
mod search;
mod upper;
pub mod video;

pub(crate) trait Validate {
    type Output;

    fn validate(self) -> Result<Self::Output>;
}

impl Validate for serde_json::Value {
    type Output = serde_json::Value;

    fn validate(self) -> Result<Self::Output> {
        let (code, msg) = match (self["code"].as_i64(), self["message"].as_str()) {
            (Some(code), Some(msg)) => (code, msg),
            _ => bail!(BiliError::InvalidResponse(self.to_string())),
        };
        ensure!(code == 0, BiliError::ErrorResponse(code, msg.to_owned()));
        Ok(self)
    }
}

/// 元数据的来源，聚合时通过它获取视频信息与 UP 主信息
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn video_view(&self, bvid: &str) -> Result<VideoView>;

    async fn owner_summary(&self, mid: i64) -> Result<OwnerSummary>;
}

#[async_trait]
impl MetadataSource for BiliClient {
    async fn video_view(&self, bvid: &str) -> Result<VideoView> {
        Video::new(self, bvid.to_owned()).get_view_info().await
    }

    async fn owner_summary(&self, mid: i64) -> Result<OwnerSummary> {
        Upper::new(self, mid).get_summary().await
    }
}
