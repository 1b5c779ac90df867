use std::sync::Once;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use leaky_bucket::RateLimiter;
use reqwest::{Method, header};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use ua_generator::ua;

use crate::bilibili::Validate;
use crate::config::{PaceOption, RateLimit, RequestOption};
use crate::utils::retry::{RetryAction, RetryPolicy};

/// 获取网页原始内容的能力，搜索页与视频页都通过它获取
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

// 一个对 reqwest::Client 的简单封装，用于 Bilibili 请求
#[derive(Clone)]
pub struct Client(reqwest::Client);

impl Client {
    pub fn new(option: &RequestOption) -> Result<Self> {
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            rustls::crypto::ring::default_provider()
                .install_default()
                .expect("Failed to install rustls crypto provider");
        });
        // 模拟浏览器访问所必须的 header，作为默认 header 添加到每个请求中，否则容易被拦截
        let mut headers = header::HeaderMap::new();
        let user_agent = match option.user_agent.as_deref() {
            Some(user_agent) => header::HeaderValue::from_str(user_agent).context("invalid user agent")?,
            None => header::HeaderValue::from_static(ua::spoof_chrome_ua()),
        };
        headers.insert(header::USER_AGENT, user_agent);
        headers.insert(
            header::REFERER,
            header::HeaderValue::from_str(&option.referer).context("invalid referer")?,
        );
        headers.insert(
            header::ORIGIN,
            header::HeaderValue::from_str(&option.origin).context("invalid origin")?,
        );
        if let Some(cookie) = option.cookie.as_deref().filter(|c| !c.is_empty()) {
            headers.insert(
                header::COOKIE,
                header::HeaderValue::from_str(cookie).context("invalid cookie")?,
            );
        }
        Ok(Self(
            reqwest::Client::builder()
                .default_headers(headers)
                .gzip(true)
                .connect_timeout(Duration::from_secs(option.connect_timeout_secs))
                .read_timeout(Duration::from_secs(option.read_timeout_secs))
                .build()
                .context("failed to build reqwest client")?,
        ))
    }

    pub fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.0.request(method, url)
    }
}

#[async_trait]
impl PageFetcher for Client {
    async fn fetch(&self, url: &str) -> Result<String> {
        Ok(self
            .request(Method::GET, url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?)
    }
}

/// 访问 Bilibili 接口的客户端：每次请求成功后固定等待一段时间，避免触发风控
pub struct BiliClient {
    pub client: Client,
    limiter: Option<RateLimiter>,
    interval: Duration,
    retry: RetryPolicy,
    token: CancellationToken,
}

impl BiliClient {
    pub fn new(
        request: &RequestOption,
        pace: &PaceOption,
        retry: RetryPolicy,
        token: CancellationToken,
    ) -> Result<Self> {
        let limiter = pace.rate_limit.as_ref().map(|RateLimit { limit, duration }| {
            RateLimiter::builder()
                .initial(*limit)
                .refill(*limit)
                .max(*limit)
                .interval(Duration::from_millis(*duration))
                .build()
        });
        Ok(Self {
            client: Client::new(request)?,
            limiter,
            interval: pace.api_interval(),
            retry,
            token,
        })
    }

    /// 获取一个预构建的请求，通过该方法获取请求时会检查并等待速率限制
    pub async fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        if let Some(limiter) = &self.limiter {
            limiter.acquire_one().await;
        }
        self.client.request(method, url)
    }

    /// 请求 JSON 接口并校验返回的 code，成功后等待 interval 再返回
    pub async fn get_json<Q>(&self, url: &str, query: &Q) -> Result<serde_json::Value>
    where
        Q: Serialize + ?Sized + Sync,
    {
        let res = self
            .retry
            .run(&self.token, |_| async move {
                match self.get_json_once(url, query).await {
                    Ok(value) => RetryAction::Success(value),
                    Err(e) if is_transport_error(&e) => RetryAction::Retry(e),
                    Err(e) => RetryAction::Fail(e),
                }
            })
            .await;
        let value = match res {
            Ok(value) => value,
            Err(e) => match e.into_inner() {
                Some(e) => return Err(e),
                None => bail!("request to {} cancelled", url),
            },
        };
        // 收到取消信号时不再等待，已经拿到的结果照常返回
        self.token.run_until_cancelled(tokio::time::sleep(self.interval)).await;
        Ok(value)
    }

    async fn get_json_once<Q>(&self, url: &str, query: &Q) -> Result<serde_json::Value>
    where
        Q: Serialize + ?Sized + Sync,
    {
        self.request(Method::GET, url)
            .await
            .query(query)
            .send()
            .await?
            .error_for_status()?
            .json::<serde_json::Value>()
            .await?
            .validate()
    }
}

/// 连接失败、超时等网络层面的错误，可以交给重试策略处理
fn is_transport_error(err: &anyhow::Error) -> bool {
    err.downcast_ref::<reqwest::Error>()
        .is_some_and(|e| e.is_connect() || e.is_timeout() || e.is_request())
}
