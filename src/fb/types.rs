//! Graph API 公共类型与响应处理
//!
//! Graph API 的列表响应统一为 `{ data: [...], paging: {...} }` 结构，
//! 错误响应统一为 `{ error: { message, code, ... } }` 结构。
//! 所有字段都可能缺失，因此一律使用 `Option` / `#[serde(default)]`。

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, error};

/// Graph 列表响应的分页信息
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GraphPaging {
    /// 下一页完整 URL（缺失表示已到末页）
    #[serde(default)]
    pub next: Option<String>,
}

/// Graph 列表响应包装结构（`data` + `paging`）
#[derive(Debug, Clone, Deserialize)]
pub struct GraphListResp<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub paging: Option<GraphPaging>,
}

/// Graph 错误详情
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GraphErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub error_subcode: Option<i64>,
    #[serde(default)]
    pub fbtrace_id: Option<String>,
}

/// Graph 错误响应包装结构
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GraphErrorBody {
    #[serde(default)]
    pub error: Option<GraphErrorDetail>,
}

/// 通用 HTTP 响应处理函数：校验状态码与 Graph 错误封装后反序列化
///
/// 所有 Graph 请求都可以共用此方法，调用方拿到的已经是业务结构体。
pub async fn handle_graph_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    operation_name: &str,
) -> Result<T> {
    let status = response.status();

    // 读取 body bytes（只能读取一次）
    let body_bytes = response.bytes().await.context("读取响应 body 失败")?;
    let body_str = String::from_utf8_lossy(&body_bytes);
    debug!("[Graph] {}响应 Body: {}", operation_name, body_str);

    // Graph 的业务错误以 error 封装返回，HTTP 状态码不一定非 2xx
    if let Ok(err_body) = serde_json::from_slice::<GraphErrorBody>(&body_bytes) {
        if let Some(detail) = err_body.error {
            error!(
                "[Graph] {}服务器错误，错误码: {}, 错误信息: {}",
                operation_name, detail.code, detail.message
            );
            return Err(anyhow::anyhow!(
                "Graph 错误 {}: {}",
                detail.code,
                detail.message
            ));
        }
    }

    if !status.is_success() {
        error!(
            "[Graph] {}请求失败，HTTP状态: {}, 响应: {}",
            operation_name, status, body_str
        );
        return Err(anyhow::anyhow!("HTTP 错误 {}: {}", status, body_str));
    }
    debug!("[Graph] {}请求成功，HTTP状态: {}", operation_name, status);

    let parsed: T = serde_json::from_slice(&body_bytes).map_err(|e| {
        error!(
            "[Graph] {}反序列化失败: {:?}\n原始响应: {}",
            operation_name, e, body_str
        );
        anyhow::anyhow!("反序列化响应失败: {:?}", e)
    })?;

    Ok(parsed)
}

/// 当前时间（epoch 毫秒）
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 解析 Graph 时间字符串为 epoch 毫秒
///
/// Graph 返回形如 `2024-05-01T12:30:00+0000` 的时间，个别接口返回标准
/// RFC3339，两种格式都兼容；解析失败返回 `None`，由调用方决定兜底值。
pub fn parse_graph_time(raw: &str) -> Option<i64> {
    if let Ok(t) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(t.timestamp_millis());
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.timestamp_millis());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_graph_time_formats() {
        // Graph 原生格式（无冒号时区）
        let ms = parse_graph_time("2024-05-01T12:30:00+0000").unwrap();
        assert!(ms > 0);
        // RFC3339 格式
        let ms2 = parse_graph_time("2024-05-01T12:30:00+00:00").unwrap();
        assert_eq!(ms, ms2);
        // 非法格式
        assert!(parse_graph_time("not-a-time").is_none());
    }
}
