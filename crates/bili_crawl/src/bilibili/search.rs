use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_stream::stream;
use futures::Stream;
use itertools::Itertools;
use regex::Regex;
use reqwest::Url;
use scraper::Selector;

use crate::bilibili::{PageFetcher, extract};

const SEARCH_URL: &str = "https://search.bilibili.com/all";

static VIDEO_CARD: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".bili-video-card").expect("video card selector"));
static BVID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^BV[0-9A-Za-z]{10}$").unwrap());

/// 按关键词遍历搜索结果页
pub struct Search<'a> {
    fetcher: &'a dyn PageFetcher,
    pub keyword: String,
    max_page: u32,
    interval: Duration,
}

/// 单页搜索结果，页内已去重且保持出现顺序
#[derive(Debug, PartialEq, Eq)]
pub struct SearchPage {
    pub page: u32,
    pub bvids: Vec<String>,
}

impl<'a> Search<'a> {
    pub fn new(fetcher: &'a dyn PageFetcher, keyword: String, max_page: u32, interval: Duration) -> Self {
        Self {
            fetcher,
            keyword,
            max_page,
            interval,
        }
    }

    pub fn page_url(&self, page: u32) -> Result<Url> {
        Ok(Url::parse_with_params(
            SEARCH_URL,
            &[
                ("keyword", self.keyword.as_str()),
                ("from_source", "webtop_search"),
                ("spm_id_from", "333.1007"),
                ("search_source", "5"),
                ("page", page.to_string().as_str()),
            ],
        )?)
    }

    async fn get_page(&self, page: u32) -> Result<SearchPage> {
        let url = self.page_url(page)?;
        debug!("请求搜索结果页：{}", url);
        let html = self.fetcher.fetch(url.as_str()).await?;
        let bvids = extract::first_hrefs(&html, &VIDEO_CARD)
            .into_iter()
            .filter_map(|href| match href.as_deref().and_then(bvid_from_href) {
                Some(bvid) => Some(bvid.to_owned()),
                None => {
                    warn!("关键词「{}」第 {} 页存在无法解析的视频卡片：{:?}", self.keyword, page, href);
                    None
                }
            })
            .unique()
            .collect();
        Ok(SearchPage { page, bvids })
    }

    /// 依次产出每一页的结果，某一页请求失败时产出错误后继续下一页。每页之间固定等待 interval
    pub fn into_page_stream(self) -> impl Stream<Item = Result<SearchPage>> + 'a {
        stream! {
            for page in 1..=self.max_page {
                yield self
                    .get_page(page)
                    .await
                    .with_context(|| format!("failed to get page {} of keyword {}", page, self.keyword));
                if page < self.max_page {
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }
}

/// 链接形如 `//www.bilibili.com/video/BV1GJ411x7h7/`，取 video 之后的一段，且必须是合法的 BV 号
pub fn bvid_from_href(href: &str) -> Option<&str> {
    let href = href.split(['?', '#']).next().unwrap_or(href);
    let href = href
        .strip_prefix("https:")
        .or_else(|| href.strip_prefix("http:"))
        .unwrap_or(href);
    href.split('/')
        .filter(|segment| !segment.is_empty())
        .skip_while(|segment| *segment != "video")
        .nth(1)
        .filter(|segment| BVID.is_match(segment))
}
