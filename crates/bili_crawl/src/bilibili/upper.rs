use anyhow::{Context, Result};
use serde::Deserialize;

use crate::bilibili::client::BiliClient;

const CARD_URL: &str = "https://api.bilibili.com/x/web-interface/card";

pub struct Upper<'a> {
    client: &'a BiliClient,
    pub mid: i64,
}

/// UP 主的粉丝数与投稿总数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "CardData")]
pub struct OwnerSummary {
    pub follower: i64,
    pub archive: i64,
}

#[derive(Deserialize)]
struct CardData {
    card: Card,
    archive_count: i64,
}

#[derive(Deserialize)]
struct Card {
    fans: i64,
}

impl From<CardData> for OwnerSummary {
    fn from(data: CardData) -> Self {
        Self {
            follower: data.card.fans,
            archive: data.archive_count,
        }
    }
}

impl<'a> Upper<'a> {
    pub fn new(client: &'a BiliClient, mid: i64) -> Self {
        Self { client, mid }
    }

    pub async fn get_summary(&self) -> Result<OwnerSummary> {
        let mut res = self
            .client
            .get_json(CARD_URL, &[("mid", self.mid)])
            .await
            .with_context(|| format!("failed to request card of upper {}", self.mid))?;
        serde_json::from_value(res["data"].take()).with_context(|| format!("failed to decode card of upper {}", self.mid))
    }
}
