use std::path::PathBuf;

use crate::utils::filenamify::filenamify;

pub(super) fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

pub(super) fn default_merged_file() -> String {
    "BV号合并.csv".to_owned()
}

pub(super) fn default_video_file() -> String {
    "视频基本信息.csv".to_owned()
}

/// 单个关键词爬取结果的文件名
pub fn keyword_file(keyword: &str) -> String {
    format!("{}BV号.csv", filenamify(keyword))
}
