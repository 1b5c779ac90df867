//! 测试用的本地 HTTP 服务，按请求路径返回固定的响应
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Router;
use axum::http::{StatusCode, Uri, header};
use tokio::net::TcpListener;

pub struct Response {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json(body: &str) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "application/json",
            body: body.as_bytes().to_vec(),
        }
    }

    pub fn bytes(body: Vec<u8>) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "application/octet-stream",
            body,
        }
    }

    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: Vec::new(),
        }
    }
}

pub struct HttpStub {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl HttpStub {
    /// handler 的参数为请求的路径（包含查询参数），hits 按请求计数
    pub async fn start(handler: impl Fn(&str) -> Response + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(handler);
        let counter = hits.clone();
        let app = Router::new().fallback(move |uri: Uri| {
            let (handler, counter) = (handler.clone(), counter.clone());
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                let path = uri.path_and_query().map_or(uri.path(), |pq| pq.as_str());
                let response = handler(path);
                (
                    response.status,
                    [(header::CONTENT_TYPE, response.content_type)],
                    response.body,
                )
            }
        });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}
