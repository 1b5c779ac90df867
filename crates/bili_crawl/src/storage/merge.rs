use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use itertools::Itertools;

use crate::storage::BvidRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub inputs: usize,
    /// 所有输入文件的行数之和
    pub rows: usize,
    /// 去重后写入的行数
    pub unique: usize,
}

fn read_rows(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("failed to open {}", path.display()))?;
    reader
        .deserialize::<BvidRow>()
        .map(|row| row.map(|row| row.bvid))
        .collect::<Result<_, _>>()
        .with_context(|| format!("failed to read {}", path.display()))
}

/// 读取 BV 号文件，按首次出现的顺序去重
pub fn read_bvids(path: &Path) -> Result<Vec<String>> {
    Ok(read_rows(path)?.into_iter().unique().collect())
}

/// 合并多个 BV 号文件，每个 BV 号只保留一次。输出文件会被覆盖，且不能是任何一个输入文件
pub fn merge_stores(inputs: &[PathBuf], output: &Path) -> Result<MergeSummary> {
    ensure!(!inputs.is_empty(), "no input file to merge");
    let output_abs = std::path::absolute(output)?;
    for input in inputs {
        ensure!(
            std::path::absolute(input)? != output_abs,
            "output {} is also an input",
            output.display()
        );
    }
    let mut rows = 0;
    let mut bvids = Vec::new();
    for input in inputs {
        let part = read_rows(input)?;
        debug!("读取 {} 完成，共 {} 行", input.display(), part.len());
        rows += part.len();
        bvids.extend(part);
    }
    let bvids = bvids.into_iter().unique().collect::<Vec<_>>();
    let mut writer = csv::Writer::from_path(output).with_context(|| format!("failed to create {}", output.display()))?;
    for bvid in &bvids {
        writer.serialize(BvidRow { bvid: bvid.clone() })?;
    }
    writer.flush()?;
    Ok(MergeSummary {
        inputs: inputs.len(),
        rows,
        unique: bvids.len(),
    })
}
