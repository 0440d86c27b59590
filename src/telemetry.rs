// 该文件是 Pitchtrack （球场追踪） 项目的一部分。
// src/telemetry.rs - IoT Hub 遥测上报
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # 遥测上报
//!
//! 每帧把跟踪报告列表以纯文本（JSON 字符串数组）发送到 Azure IoT Hub 设备端点。
//!
//! ## 连接字符串
//!
//! ```text
//! HostName=<hub>.azure-devices.net;DeviceId=<device>;SharedAccessKey=<base64 key>
//! ```
//!
//! 设备到云消息走 HTTPS：
//! `POST https://<hub>/devices/<device>/messages/events?api-version=2020-03-13`，
//! 使用由设备密钥签名的 SAS 令牌鉴权。
//!
//! [`IotHubClient::connect`] 先以同一令牌请求一次
//! `GET .../messages/deviceBound`，主机不可达或鉴权被拒时直接返回错误。

use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use base64::prelude::*;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

const API_VERSION: &str = "2020-03-13";
const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;
// 令牌剩余有效期低于该值时提前续签
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Error, Debug)]
pub enum TelemetryError {
  #[error("连接字符串缺少字段: {0}")]
  MissingField(&'static str),
  #[error("连接字符串格式错误: {0}")]
  MalformedConnectionString(String),
  #[error("设备密钥无效")]
  InvalidKey,
  #[error("端点地址无效: {0}")]
  InvalidEndpoint(String),
  #[error("IoT Hub 拒绝消息: HTTP {status}: {body}")]
  Rejected { status: u16, body: String },
  #[error("网络错误: {0}")]
  Transport(String),
}

pub trait Publisher: Send {
  fn publish(&self, report: &[String]) -> Result<(), TelemetryError>;

  fn shutdown(&self) {}
}

/// 报告列表的纯文本形式
pub fn report_text(report: &[String]) -> String {
  serde_json::to_string(report).unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
  pub host_name: String,
  pub device_id: String,
  pub shared_access_key: String,
}

impl FromStr for ConnectionString {
  type Err = TelemetryError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut host_name = None;
    let mut device_id = None;
    let mut shared_access_key = None;

    for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
      let (key, value) = part
        .split_once('=')
        .ok_or_else(|| TelemetryError::MalformedConnectionString(part.to_string()))?;
      match key {
        "HostName" => host_name = Some(value.to_string()),
        "DeviceId" => device_id = Some(value.to_string()),
        "SharedAccessKey" => shared_access_key = Some(value.to_string()),
        _ => debug!("忽略连接字符串字段: {}", key),
      }
    }

    Ok(ConnectionString {
      host_name: host_name.ok_or(TelemetryError::MissingField("HostName"))?,
      device_id: device_id.ok_or(TelemetryError::MissingField("DeviceId"))?,
      shared_access_key: shared_access_key
        .ok_or(TelemetryError::MissingField("SharedAccessKey"))?,
    })
  }
}

impl ConnectionString {
  pub fn resource_uri(&self) -> String {
    format!("{}/devices/{}", self.host_name, self.device_id)
  }

  pub fn events_endpoint(&self) -> Result<Url, TelemetryError> {
    self.device_url(&["messages", "events"])
  }

  /// 云到设备消息的接收地址，连接时用于验证设备凭据
  pub fn device_bound_endpoint(&self) -> Result<Url, TelemetryError> {
    self.device_url(&["messages", "deviceBound"])
  }

  fn device_url(&self, segments: &[&str]) -> Result<Url, TelemetryError> {
    let mut url = Url::parse(&format!("https://{}/", self.host_name))
      .map_err(|e| TelemetryError::InvalidEndpoint(e.to_string()))?;
    url
      .path_segments_mut()
      .map_err(|_| TelemetryError::InvalidEndpoint(self.host_name.clone()))?
      .clear()
      .extend(["devices", self.device_id.as_str()])
      .extend(segments);
    url.query_pairs_mut().append_pair("api-version", API_VERSION);
    Ok(url)
  }
}

fn request_error(error: ureq::Error) -> TelemetryError {
  match error {
    ureq::Error::Status(status, response) => TelemetryError::Rejected {
      status,
      body: response.into_string().unwrap_or_default(),
    },
    ureq::Error::Transport(transport) => TelemetryError::Transport(transport.to_string()),
  }
}

/// 生成 `SharedAccessSignature sr=..&sig=..&se=..` 令牌
pub fn sas_token(resource_uri: &str, key: &str, expiry: i64) -> Result<String, TelemetryError> {
  let key = BASE64_STANDARD
    .decode(key)
    .map_err(|_| TelemetryError::InvalidKey)?;
  let encoded_uri = urlencoding::encode(resource_uri);
  let to_sign = format!("{}\n{}", encoded_uri, expiry);

  let mut mac = Hmac::<Sha256>::new_from_slice(&key).map_err(|_| TelemetryError::InvalidKey)?;
  mac.update(to_sign.as_bytes());
  let signature = BASE64_STANDARD.encode(mac.finalize().into_bytes());

  Ok(format!(
    "SharedAccessSignature sr={}&sig={}&se={}",
    encoded_uri,
    urlencoding::encode(&signature),
    expiry
  ))
}

struct CachedToken {
  token: String,
  expiry: i64,
}

pub struct IotHubClient {
  connection: ConnectionString,
  endpoint: Url,
  agent: ureq::Agent,
  token_ttl: i64,
  token: Mutex<Option<CachedToken>>,
}

impl IotHubClient {
  /// 解析连接字符串并签发首个令牌，不访问网络
  pub fn new(connection_string: &str) -> Result<Self, TelemetryError> {
    let connection: ConnectionString = connection_string.parse()?;
    let endpoint = connection.events_endpoint()?;
    let agent = ureq::AgentBuilder::new()
      .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
      .build();

    let client = IotHubClient {
      connection,
      endpoint,
      agent,
      token_ttl: DEFAULT_TOKEN_TTL_SECS,
      token: Mutex::new(None),
    };
    client.authorization()?;
    Ok(client)
  }

  /// 创建客户端并向 IoT Hub 发起一次鉴权请求，主机不可达或凭据被拒即视为无法连接
  pub fn connect(connection_string: &str) -> Result<Self, TelemetryError> {
    let client = Self::new(connection_string)?;
    client.verify()?;
    info!(
      "IoT Hub 已连接: {} (设备 {})",
      client.connection.host_name, client.connection.device_id
    );
    Ok(client)
  }

  fn verify(&self) -> Result<(), TelemetryError> {
    let authorization = self.authorization()?;
    let url = self.connection.device_bound_endpoint()?;
    let response = self
      .agent
      .get(url.as_str())
      .set("Authorization", &authorization)
      .call()
      .map_err(request_error)?;

    // 200 表示取到并锁定了一条云到设备消息，放弃锁定让消息留在队列中
    if response.status() == 200 {
      if let Some(etag) = response.header("ETag") {
        let etag = etag.trim_matches('"').to_string();
        let abandon = self
          .connection
          .device_url(&["messages", "deviceBound", etag.as_str(), "abandon"])?;
        if let Err(e) = self
          .agent
          .post(abandon.as_str())
          .set("Authorization", &authorization)
          .call()
        {
          warn!("释放云到设备消息失败: {}", e);
        }
      }
    }
    Ok(())
  }

  pub fn endpoint(&self) -> &Url {
    &self.endpoint
  }

  fn authorization(&self) -> Result<String, TelemetryError> {
    let now = Utc::now().timestamp();
    let mut cached = self
      .token
      .lock()
      .map_err(|_| TelemetryError::Transport("令牌缓存锁已损坏".to_string()))?;
    if let Some(token) = cached.as_ref() {
      if token.expiry - now > TOKEN_REFRESH_MARGIN_SECS {
        return Ok(token.token.clone());
      }
    }

    let expiry = now + self.token_ttl;
    let token = sas_token(
      &self.connection.resource_uri(),
      &self.connection.shared_access_key,
      expiry,
    )?;
    debug!("SAS 令牌已签发，过期时间 {}", expiry);
    *cached = Some(CachedToken {
      token: token.clone(),
      expiry,
    });
    Ok(token)
  }
}

impl Publisher for IotHubClient {
  fn publish(&self, report: &[String]) -> Result<(), TelemetryError> {
    let body = report_text(report);
    let authorization = self.authorization()?;

    self
      .agent
      .post(self.endpoint.as_str())
      .set("Authorization", &authorization)
      .set("Content-Type", "text/plain; charset=utf-8")
      .send_string(&body)
      .map_err(request_error)?;
    debug!("遥测消息已发送: {}", body);
    Ok(())
  }

  fn shutdown(&self) {
    info!("IoT Hub 连接已关闭: {}", self.connection.device_id);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const KEY: &str = "c2VjcmV0LWtleS1mb3ItdGVzdHM=";

  fn connection_string() -> String {
    format!(
      "HostName=pitch.azure-devices.net;DeviceId=camera 01;SharedAccessKey={}",
      KEY
    )
  }

  #[test]
  fn parses_connection_string_with_padded_key() {
    let parsed: ConnectionString = connection_string().parse().unwrap();
    assert_eq!(parsed.host_name, "pitch.azure-devices.net");
    assert_eq!(parsed.device_id, "camera 01");
    assert_eq!(parsed.shared_access_key, KEY);
  }

  #[test]
  fn missing_device_id_is_reported() {
    let err = "HostName=a.net;SharedAccessKey=abc="
      .parse::<ConnectionString>()
      .unwrap_err();
    assert!(matches!(err, TelemetryError::MissingField("DeviceId")));
  }

  #[test]
  fn malformed_segment_is_reported() {
    let err = "HostName=a.net;garbage".parse::<ConnectionString>().unwrap_err();
    assert!(matches!(err, TelemetryError::MalformedConnectionString(_)));
  }

  #[test]
  fn endpoint_escapes_device_id() {
    let parsed: ConnectionString = connection_string().parse().unwrap();
    let endpoint = parsed.events_endpoint().unwrap();
    assert_eq!(
      endpoint.as_str(),
      "https://pitch.azure-devices.net/devices/camera%2001/messages/events?api-version=2020-03-13"
    );
  }

  #[test]
  fn sas_token_is_deterministic_and_well_formed() {
    let a = sas_token("pitch.azure-devices.net/devices/cam", KEY, 1_700_000_000).unwrap();
    let b = sas_token("pitch.azure-devices.net/devices/cam", KEY, 1_700_000_000).unwrap();
    assert_eq!(a, b);
    assert!(a.starts_with("SharedAccessSignature sr=pitch.azure-devices.net%2Fdevices%2Fcam&sig="));
    assert!(a.ends_with("&se=1700000000"));

    let other = sas_token("pitch.azure-devices.net/devices/cam", KEY, 1_700_000_001).unwrap();
    assert_ne!(a, other);
  }

  #[test]
  fn invalid_key_is_rejected() {
    assert!(matches!(
      sas_token("host/devices/cam", "not base64!", 0),
      Err(TelemetryError::InvalidKey)
    ));
  }

  #[test]
  fn connect_fails_on_bad_connection_string() {
    assert!(IotHubClient::connect("DeviceId=x").is_err());
  }

  #[test]
  fn new_builds_endpoint_without_network() {
    let client = IotHubClient::new(&connection_string()).unwrap();
    assert_eq!(client.endpoint().host_str(), Some("pitch.azure-devices.net"));
  }

  #[test]
  fn device_bound_endpoint_targets_device() {
    let parsed: ConnectionString = connection_string().parse().unwrap();
    let url = parsed.device_bound_endpoint().unwrap();
    assert_eq!(url.host_str(), Some("pitch.azure-devices.net"));
    assert!(url.path().ends_with("/messages/deviceBound"));
    assert_eq!(url.query(), Some("api-version=2020-03-13"));
  }

  #[test]
  fn connect_fails_when_hub_is_unreachable() {
    // 本机 9 号端口无服务监听，请求在传输层失败
    let result = IotHubClient::connect("HostName=127.0.0.1:9;DeviceId=d;SharedAccessKey=c2VjcmV0");
    assert!(matches!(result, Err(TelemetryError::Transport(_))));
  }

  #[test]
  fn report_is_serialized_as_json_array() {
    let report = vec!["3 Player [1, 2, 3, 4]".to_string()];
    assert_eq!(report_text(&report), r#"["3 Player [1, 2, 3, 4]"]"#);
    assert_eq!(report_text(&[]), "[]");
  }
}
