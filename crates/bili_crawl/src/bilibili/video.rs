use anyhow::{Context, Result};
use chrono::serde::ts_seconds;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::bilibili::client::BiliClient;

const VIEW_URL: &str = "https://api.bilibili.com/x/web-interface/view";

pub struct Video<'a> {
    client: &'a BiliClient,
    pub bvid: String,
}

/// 视频详情接口返回的字段，缺少任意一个都视为解析失败
#[derive(Debug, Clone, Deserialize)]
pub struct VideoView {
    pub bvid: String,
    pub aid: i64,
    pub cid: i64,
    pub owner: Owner,
    pub title: String,
    pub tname: String,
    #[serde(with = "ts_seconds")]
    pub pubdate: DateTime<Utc>,
    pub desc: String,
    pub stat: Stat,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Owner {
    pub mid: i64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct Stat {
    pub view: i64,
    pub like: i64,
    pub coin: i64,
    pub favorite: i64,
    pub share: i64,
    pub reply: i64,
    pub danmaku: i64,
}

impl Stat {
    /// 播放占 0.5，点赞、投币、收藏占 0.3，评论、弹幕占 0.2
    pub fn weighted_sum(&self) -> f64 {
        0.5 * self.view as f64
            + 0.3 * (self.like + self.coin + self.favorite) as f64
            + 0.2 * (self.reply + self.danmaku) as f64
    }

    /// 传播效果指数，即加权和的自然对数。加权和不为正数时没有定义，返回 None
    pub fn engagement_score(&self) -> Option<f64> {
        let sum = self.weighted_sum();
        (sum > 0.0).then(|| sum.ln())
    }
}

impl<'a> Video<'a> {
    pub fn new(client: &'a BiliClient, bvid: String) -> Self {
        Self { client, bvid }
    }

    /// 直接调用视频信息接口获取详细的视频信息
    pub async fn get_view_info(&self) -> Result<VideoView> {
        let mut res = self
            .client
            .get_json(VIEW_URL, &[("bvid", self.bvid.as_str())])
            .await
            .with_context(|| format!("failed to request view info of {}", self.bvid))?;
        serde_json::from_value(res["data"].take()).with_context(|| format!("failed to decode view info of {}", self.bvid))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeZone};
    use serde_json::json;

    use super::*;

    fn view_json() -> serde_json::Value {
        json!({
            "bvid": "BV1GJ411x7h7",
            "aid": 80433022,
            "videos": 1,
            "tid": 17,
            "tname": "单机游戏",
            "copyright": 1,
            "pic": "http://i0.hdslb.com/bfs/archive/cover.jpg",
            "title": "永不放弃",
            "pubdate": 1577808000,
            "ctime": 1577808000,
            "desc": "简介\n第二行",
            "duration": 213,
            "owner": {"mid": 12345, "name": "某 UP 主", "face": "http://i0.hdslb.com/face.jpg"},
            "stat": {
                "aid": 80433022, "view": 100, "danmaku": 3, "reply": 2, "favorite": 5,
                "coin": 5, "share": 7, "now_rank": 0, "his_rank": 0, "like": 10
            },
            "cid": 137649199
        })
    }

    #[test]
    fn test_engagement_score() {
        let stat = Stat {
            view: 100,
            like: 10,
            coin: 5,
            favorite: 5,
            share: 0,
            reply: 2,
            danmaku: 3,
        };
        assert!((stat.weighted_sum() - 57.0).abs() < 1e-9);
        let score = stat.engagement_score().unwrap();
        assert!((score - 57f64.ln()).abs() < 1e-12);
        assert!((score - 4.0431).abs() < 1e-4);
        // 分享数不参与计算
        assert_eq!(Stat { share: 1000, ..stat }.engagement_score(), Some(score));
    }

    #[test]
    fn test_engagement_score_undefined() {
        assert_eq!(Stat::default().engagement_score(), None);
        let broken = Stat {
            view: -10,
            ..Default::default()
        };
        assert_eq!(broken.engagement_score(), None);
    }

    #[test]
    fn test_decode_view() {
        let view: VideoView = serde_json::from_value(view_json()).unwrap();
        assert_eq!(view.aid, 80433022);
        assert_eq!(view.cid, 137649199);
        assert_eq!(view.owner.mid, 12345);
        assert_eq!(view.tname, "单机游戏");
        assert_eq!(view.stat.like, 10);
        let beijing = FixedOffset::east_opt(8 * 3600).unwrap();
        assert_eq!(
            view.pubdate.with_timezone(&beijing),
            beijing.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_decode_view_missing_field() {
        let mut value = view_json();
        value["stat"].as_object_mut().unwrap().remove("coin");
        let err = serde_json::from_value::<VideoView>(value).unwrap_err();
        assert!(err.to_string().contains("coin"));
    }
}
