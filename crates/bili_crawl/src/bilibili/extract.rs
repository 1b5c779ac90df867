//! 从网页源码中提取字段的工具函数。
//!
//! 这里只处理搜索页与视频页中用得到的几种结构，并不是通用的 HTML 解析器。
use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

static ANCHOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a").expect("anchor selector"));
static META_PROPERTY: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("meta[property]").expect("meta selector"));
static PLAY_INFO: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"window\.__playinfo__=(\{.*?\})</script>").unwrap());

/// 找到所有匹配 `card` 的元素，返回每个元素内第一个链接的 href
///
/// 只在元素自身的子树中查找，元素内没有链接或链接没有 href 时对应位置为 None
pub fn first_hrefs(html: &str, card: &Selector) -> Vec<Option<String>> {
    let document = Html::parse_document(html);
    document
        .select(card)
        .map(|element| {
            element
                .select(&ANCHOR)
                .next()
                .and_then(|anchor| anchor.value().attr("href"))
                .map(str::to_owned)
        })
        .collect()
}

/// 读取 `<meta property="..." content="...">` 的 content
pub fn meta_property(html: &str, property: &str) -> Option<String> {
    let document = Html::parse_document(html);
    document
        .select(&META_PROPERTY)
        .find(|meta| meta.value().attr("property") == Some(property))
        .and_then(|meta| meta.value().attr("content"))
        .map(str::to_owned)
}

/// 视频页中内嵌的 `window.__playinfo__` JSON 文本
pub fn play_info_blob(html: &str) -> Option<&str> {
    PLAY_INFO.captures(html).and_then(|cap| cap.get(1)).map(|m| m.as_str())
}
