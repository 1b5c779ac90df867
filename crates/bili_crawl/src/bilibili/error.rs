use thiserror::Error;

use crate::bilibili::StreamKind;

#[derive(Error, Debug)]
pub enum BiliError {
    #[error("response missing 'code' or 'message' field, full response: {0}")]
    InvalidResponse(String),
    #[error("API returned error code {0}, message: {1}")]
    ErrorResponse(i64, String),
    #[error("play manifest not found in the page of {0}")]
    ManifestNotFound(String),
    #[error("play manifest of {bvid} is malformed: {source}")]
    ManifestMalformed {
        bvid: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no {kind} streams available for {bvid}")]
    StreamsEmpty { bvid: String, kind: StreamKind },
    #[error("engagement score of {bvid} is undefined, weighted sum is {sum}")]
    UndefinedEngagementScore { bvid: String, sum: f64 },
}
