use std::sync::LazyLock;

use regex::Regex;

static RESERVED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[<>:\"/\\\\|?*\u{0000}-\u{001F}\u{007F}\u{0080}-\u{009F}]+").unwrap());
static WINDOWS_RESERVED: LazyLock<Regex> = LazyLock::new(|| Regex::new("(?i)^(con|prn|aux|nul|com\\d|lpt\\d)$").unwrap());
static OUTER_PERIODS: LazyLock<Regex> = LazyLock::new(|| Regex::new("^\\.+|\\.+$").unwrap());

/// 网页标题末尾附带的站点后缀
const TITLE_SUFFIX: &str = "_哔哩哔哩_bilibili";

pub fn filenamify<S: AsRef<str>>(input: S) -> String {
    let input = RESERVED.replace_all(input.as_ref(), "_");
    let mut result = OUTER_PERIODS.replace_all(input.as_ref(), "_").into_owned();
    if WINDOWS_RESERVED.is_match(&result) {
        result.push('_');
    }
    result
}

/// 将视频标题转换为可以用作文件名的字符串，标题为空时使用 fallback（一般为 BV 号）
pub fn title_to_filename(title: &str, fallback: &str) -> String {
    let title = title.trim();
    let title = title.strip_suffix(TITLE_SUFFIX).unwrap_or(title).trim();
    if title.is_empty() {
        return filenamify(fallback);
    }
    filenamify(title)
}
