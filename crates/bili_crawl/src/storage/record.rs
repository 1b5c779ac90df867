use chrono::{DateTime, Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::bilibili::{BiliError, OwnerSummary, VideoView};

/// 爬虫输出文件中的一行
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BvidRow {
    #[serde(rename = "BV号")]
    pub bvid: String,
}

/// 视频基本信息文件中的一行，字段顺序即列顺序
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    #[serde(rename = "BV号")]
    pub bvid: String,
    #[serde(rename = "AV号")]
    pub aid: i64,
    #[serde(rename = "CID")]
    pub cid: i64,
    #[serde(rename = "UP主ID")]
    pub mid: i64,
    #[serde(rename = "UP主名称")]
    pub name: String,
    #[serde(rename = "UP主粉丝数")]
    pub follower: i64,
    #[serde(rename = "作品总数")]
    pub archive: i64,
    #[serde(rename = "视频标题")]
    pub title: String,
    #[serde(rename = "视频分类标签")]
    pub tname: String,
    #[serde(rename = "发布日期")]
    pub pub_date: String,
    #[serde(rename = "发布时间")]
    pub pub_time: String,
    #[serde(rename = "视频简介")]
    pub desc: String,
    #[serde(rename = "播放量")]
    pub view: i64,
    #[serde(rename = "点赞数")]
    pub like: i64,
    #[serde(rename = "投币数")]
    pub coin: i64,
    #[serde(rename = "收藏数")]
    pub favorite: i64,
    #[serde(rename = "分享数")]
    pub share: i64,
    #[serde(rename = "评论数")]
    pub reply: i64,
    #[serde(rename = "弹幕数")]
    pub danmaku: i64,
    #[serde(rename = "传播效果指数")]
    pub communication_index: f64,
}

/// 将发布时间拆分为日期与时间两部分
pub fn split_datetime<Tz: TimeZone>(datetime: &DateTime<Utc>, tz: &Tz) -> (String, String)
where
    Tz::Offset: std::fmt::Display,
{
    let local = datetime.with_timezone(tz);
    (
        local.format("%Y-%m-%d").to_string(),
        local.format("%H:%M:%S").to_string(),
    )
}

impl VideoRecord {
    /// 组合视频信息与 UP 主信息，发布时间按本地时区拆分
    pub fn compose(view: VideoView, owner: OwnerSummary) -> Result<Self, BiliError> {
        Self::compose_in(view, owner, &Local)
    }

    pub fn compose_in<Tz: TimeZone>(view: VideoView, owner: OwnerSummary, tz: &Tz) -> Result<Self, BiliError>
    where
        Tz::Offset: std::fmt::Display,
    {
        let communication_index =
            view.stat
                .engagement_score()
                .ok_or_else(|| BiliError::UndefinedEngagementScore {
                    bvid: view.bvid.clone(),
                    sum: view.stat.weighted_sum(),
                })?;
        let (pub_date, pub_time) = split_datetime(&view.pubdate, tz);
        Ok(Self {
            bvid: view.bvid,
            aid: view.aid,
            cid: view.cid,
            mid: view.owner.mid,
            name: view.owner.name,
            follower: owner.follower,
            archive: owner.archive,
            title: view.title,
            tname: view.tname,
            pub_date,
            pub_time,
            desc: view.desc,
            view: view.stat.view,
            like: view.stat.like,
            coin: view.stat.coin,
            favorite: view.stat.favorite,
            share: view.stat.share,
            reply: view.stat.reply,
            danmaku: view.stat.danmaku,
            communication_index,
        })
    }
}
