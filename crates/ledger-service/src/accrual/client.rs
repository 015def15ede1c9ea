//! 积分系统 HTTP 客户端
//!
//! `GET {base_url}/api/orders/{number}`：
//! - 200：JSON 结果
//! - 204：订单未登记
//! - 429：限流，`Retry-After` 给出秒数
//! - 其他：非预期响应

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use rust_decimal::Decimal;
use tracing::{debug, info};

use loyalty_shared::config::AccrualConfig;

use super::{AccrualAuthority, AccrualError, AccrualReport};

/// 未携带 Retry-After 时的默认等待时间
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(60);

/// 积分系统 HTTP 客户端
///
/// reqwest::Client 内部带连接池，clone 是廉价操作
#[derive(Clone)]
pub struct HttpAccrualClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAccrualClient {
    /// 创建客户端，每个请求的超时时间由配置决定
    pub fn new(config: &AccrualConfig) -> Result<Self, AccrualError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| AccrualError::Transport(format!("HTTP 客户端初始化失败: {e}")))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        info!(base_url = %base_url, timeout_ms = config.request_timeout_ms, "积分系统客户端已初始化");

        Ok(Self { http, base_url })
    }

    fn order_url(&self, order_id: &str) -> String {
        format!("{}/api/orders/{}", self.base_url, order_id)
    }
}

#[async_trait]
impl AccrualAuthority for HttpAccrualClient {
    async fn fetch(&self, order_id: &str) -> Result<AccrualReport, AccrualError> {
        let response = self
            .http
            .get(self.order_url(order_id))
            .send()
            .await
            .map_err(|e| transport_error(e, order_id))?;

        let status = response.status();
        debug!(order_id = %order_id, status = status.as_u16(), "积分系统响应");

        match status {
            StatusCode::OK => {
                let report: AccrualReport = response
                    .json()
                    .await
                    .map_err(|e| transport_error(e, order_id))?;
                validate(order_id, report)
            }
            StatusCode::NO_CONTENT => Ok(AccrualReport::unregistered(order_id)),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_RETRY_AFTER);
                Err(AccrualError::RateLimited { retry_after })
            }
            other => Err(AccrualError::UnexpectedStatus {
                status: other.as_u16(),
            }),
        }
    }
}

fn transport_error(err: reqwest::Error, order_id: &str) -> AccrualError {
    if err.is_timeout() {
        AccrualError::Timeout {
            order_id: order_id.to_string(),
        }
    } else if err.is_decode() {
        AccrualError::Decode(err.to_string())
    } else {
        AccrualError::Transport(err.to_string())
    }
}

/// 拒绝与请求不符或积分为负的响应
fn validate(order_id: &str, report: AccrualReport) -> Result<AccrualReport, AccrualError> {
    if report.order != order_id {
        return Err(AccrualError::Decode(format!(
            "响应订单号不匹配: 请求 {order_id}, 响应 {}",
            report.order
        )));
    }
    if report.accrual.is_some_and(|a| a < Decimal::ZERO) {
        return Err(AccrualError::Decode(format!(
            "积分不能为负: order_id={order_id}"
        )));
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accrual::AccrualStatus;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ORDER: &str = "79927398713";

    fn client_for(server: &MockServer, timeout_ms: u64) -> HttpAccrualClient {
        HttpAccrualClient::new(&AccrualConfig {
            base_url: format!("{}/", server.uri()),
            request_timeout_ms: timeout_ms,
        })
        .unwrap()
    }

    async fn respond(template: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/api/orders/{ORDER}")))
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_fetch_processed_order() {
        let server = respond(ResponseTemplate::new(200).set_body_json(json!({
            "order": ORDER,
            "status": "PROCESSED",
            "accrual": 729.98
        })))
        .await;

        let report = client_for(&server, 1000).fetch(ORDER).await.unwrap();
        assert_eq!(report.status, AccrualStatus::Processed);
        assert_eq!(report.accrual, Some(dec!(729.98)));
    }

    #[tokio::test]
    async fn test_fetch_registered_order() {
        let server = respond(ResponseTemplate::new(200).set_body_json(json!({
            "order": ORDER,
            "status": "REGISTERED"
        })))
        .await;

        let report = client_for(&server, 1000).fetch(ORDER).await.unwrap();
        assert_eq!(report.status, AccrualStatus::Registered);
        assert_eq!(report.accrual, None);
    }

    #[tokio::test]
    async fn test_no_content_means_unregistered() {
        let server = respond(ResponseTemplate::new(204)).await;

        let report = client_for(&server, 1000).fetch(ORDER).await.unwrap();
        assert_eq!(report.status, AccrualStatus::Unregistered);
        assert!(report.to_update().is_none());
    }

    #[tokio::test]
    async fn test_rate_limited_reads_retry_after() {
        let server =
            respond(ResponseTemplate::new(429).insert_header("Retry-After", "7")).await;

        let err = client_for(&server, 1000).fetch(ORDER).await.unwrap_err();
        match err {
            AccrualError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Duration::from_secs(7))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rate_limited_without_header_uses_default() {
        let server = respond(ResponseTemplate::new(429)).await;

        let err = client_for(&server, 1000).fetch(ORDER).await.unwrap_err();
        assert!(matches!(
            err,
            AccrualError::RateLimited { retry_after } if retry_after == DEFAULT_RETRY_AFTER
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_unexpected_status() {
        let server = respond(ResponseTemplate::new(500)).await;

        let err = client_for(&server, 1000).fetch(ORDER).await.unwrap_err();
        assert!(matches!(err, AccrualError::UnexpectedStatus { status: 500 }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = respond(
            ResponseTemplate::new(200)
                .set_body_json(json!({"order": ORDER, "status": "PROCESSING"}))
                .set_delay(Duration::from_millis(500)),
        )
        .await;

        let err = client_for(&server, 50).fetch(ORDER).await.unwrap_err();
        assert!(matches!(err, AccrualError::Timeout { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_negative_accrual_is_rejected() {
        let server = respond(ResponseTemplate::new(200).set_body_json(json!({
            "order": ORDER,
            "status": "PROCESSED",
            "accrual": -1
        })))
        .await;

        let err = client_for(&server, 1000).fetch(ORDER).await.unwrap_err();
        assert!(matches!(err, AccrualError::Decode(_)));
    }
}
