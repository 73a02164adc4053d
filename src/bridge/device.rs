//! 设备列表与多设备配对

use crate::bridge::client::{required, ClientBridge};
use crate::bridge::native::{DeviceEntry, PairingRequestEntry};
use crate::bridge::serialization::hex_to_bytes;
use crate::bridge::types::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceUi {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "lastSeenSec")]
    pub last_seen_sec: i64,
}

impl From<DeviceEntry> for DeviceUi {
    fn from(e: DeviceEntry) -> Self {
        Self {
            device_id: e.device_id,
            last_seen_sec: e.last_seen_sec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingRequestUi {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

impl From<PairingRequestEntry> for PairingRequestUi {
    fn from(e: PairingRequestEntry) -> Self {
        Self {
            device_id: e.device_id,
            request_id: e.request_id_hex,
        }
    }
}

impl ClientBridge {
    pub async fn devices(&self) -> Vec<DeviceUi> {
        self.inner.state.lock().await.devices.clone()
    }

    pub async fn pairing_requests(&self) -> Vec<PairingRequestUi> {
        self.inner.state.lock().await.pairing_requests.clone()
    }

    /// 拉取已登录设备列表
    pub async fn refresh_devices(&self) -> BridgeResult<Vec<DeviceUi>> {
        let list = self
            .call_simple(true, "list_devices", |sdk| sdk.list_devices())
            .await?;
        let mut st = self.inner.state.lock().await;
        st.devices = list.into_iter().map(Into::into).collect();
        Ok(st.devices.clone())
    }

    /// 踢下线；不能踢自己当前的设备
    pub async fn kick_device(&self, device_id: &str) -> BridgeResult<()> {
        self.ready(true).await?;
        let device_id = required(device_id, "Device id is empty")?;
        {
            let st = self.inner.state.lock().await;
            if !st.device_id.is_empty() && st.device_id == device_id {
                return Err(BridgeError::invalid("Cannot kick the current device"));
            }
        }
        let id = device_id.clone();
        self.call_simple(true, "kick_device", move |sdk| sdk.kick_device(&id))
            .await?;
        info!("[Device] 📴 已踢下线 {}", device_id);
        self.refresh_devices().await.map(|_| ())
    }

    // ---------- 配对：主设备 ----------

    /// 开始配对，返回展示给新设备的配对码
    pub async fn begin_device_pairing_primary(&self) -> BridgeResult<String> {
        let code = self
            .call_simple(true, "pairing_primary", |sdk| sdk.begin_device_pairing_primary())
            .await?;
        info!("[Device] 🔗 配对码已生成");
        Ok(code)
    }

    pub async fn poll_device_pairing_requests(&self) -> BridgeResult<Vec<PairingRequestUi>> {
        let list = self
            .call_simple(true, "pairing_requests", |sdk| sdk.poll_device_pairing_requests())
            .await?;
        let mut st = self.inner.state.lock().await;
        st.pairing_requests = list.into_iter().map(Into::into).collect();
        Ok(st.pairing_requests.clone())
    }

    /// 批准配对请求；请求 ID 必须是合法十六进制
    pub async fn approve_device_pairing_request(
        &self,
        device_id: &str,
        request_id_hex: &str,
    ) -> BridgeResult<()> {
        self.ready(true).await?;
        let device_id = required(device_id, "Device id is empty")?;
        hex_to_bytes(request_id_hex)?;
        let request_id = request_id_hex.trim().to_lowercase();
        let (dev, req) = (device_id.clone(), request_id.clone());
        self.call_simple(true, "pairing_approve", move |sdk| {
            sdk.approve_device_pairing_request(&dev, &req)
        })
        .await?;
        info!("[Device] ✅ 已批准配对 {}", device_id);
        {
            let mut st = self.inner.state.lock().await;
            st.pairing_requests
                .retain(|r| !(r.device_id == device_id && r.request_id == request_id));
        }
        self.refresh_devices().await.map(|_| ())
    }

    // ---------- 配对：新设备 ----------

    pub async fn begin_device_pairing_linked(&self, pairing_code: &str) -> BridgeResult<()> {
        self.ready(false).await?;
        let code = required(pairing_code, "Pairing code is empty")?;
        self.call_simple(false, "pairing_linked", move |sdk| {
            sdk.begin_device_pairing_linked(&code)
        })
        .await
    }

    /// 返回配对是否完成
    pub async fn poll_device_pairing_linked(&self) -> BridgeResult<bool> {
        self.call_simple(false, "pairing_linked_poll", |sdk| {
            sdk.poll_device_pairing_linked()
        })
        .await
    }

    pub async fn cancel_device_pairing(&self) -> BridgeResult<()> {
        let native = self.ready(false).await?;
        // 取消总是成功
        let _ = native
            .call("pairing_cancel", |sdk| {
                sdk.cancel_device_pairing();
                Ok(())
            })
            .await;
        let mut st = self.inner.state.lock().await;
        st.pairing_requests.clear();
        Ok(())
    }
}
