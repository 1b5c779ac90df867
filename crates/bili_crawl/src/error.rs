use anyhow::Result;

use crate::bilibili::BiliError;
use crate::storage::AppendOutcome;

/// 单个 BV 号的处理结果
#[derive(Debug)]
pub enum ExecutionStatus {
    Succeeded,
    /// 文件持续被占用，记录没有写入
    GaveUp,
    /// 数据本身无法处理，不算作失败
    Ignored(anyhow::Error),
    Failed(anyhow::Error),
}

// 目前 stable rust 似乎不支持自定义类型使用 ? 运算符，只能先在返回值使用 Result，再这样套层娃
impl From<Result<AppendOutcome>> for ExecutionStatus {
    fn from(res: Result<AppendOutcome>) -> Self {
        match res {
            Ok(AppendOutcome::Written) => ExecutionStatus::Succeeded,
            Ok(AppendOutcome::GaveUp) => ExecutionStatus::GaveUp,
            Err(err) => {
                if err.chain().any(|cause| {
                    matches!(
                        cause.downcast_ref::<BiliError>(),
                        Some(BiliError::UndefinedEngagementScore { .. })
                    )
                }) {
                    return ExecutionStatus::Ignored(err);
                }
                ExecutionStatus::Failed(err)
            }
        }
    }
}
