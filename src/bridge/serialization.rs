use chrono::{Local, TimeZone};

use crate::bridge::types::{BridgeError, BridgeResult};

/// 通话 ID 固定 16 字节
pub const CALL_ID_LEN: usize = 16;

/// 十六进制转字节，空白与非法字符按输入错误处理
pub fn hex_to_bytes(input: &str) -> BridgeResult<Vec<u8>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(BridgeError::invalid("Hex value is empty"));
    }
    hex::decode(trimmed).map_err(|e| BridgeError::invalid(format!("Invalid hex: {}", e)))
}

/// 解析 32 位十六进制通话 ID
pub fn call_id_from_hex(input: &str) -> BridgeResult<[u8; CALL_ID_LEN]> {
    let bytes = hex_to_bytes(input)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| BridgeError::invalid(format!("Call id must be {} bytes", CALL_ID_LEN)))
}

pub fn call_id_to_hex(call_id: &[u8]) -> String {
    hex::encode(call_id)
}

/// 经纬度转 E7 整数（原生层使用的定点表示）
pub fn coordinate_to_e7(value: f64, limit: f64) -> BridgeResult<i32> {
    if !value.is_finite() {
        return Err(BridgeError::invalid("Coordinate is not a finite number"));
    }
    if value.abs() > limit {
        return Err(BridgeError::invalid(format!(
            "Coordinate {} out of range ±{}",
            value, limit
        )));
    }
    Ok((value * 1e7).round() as i32)
}

/// 由内容派生稳定的消息 ID（原生层未分配 ID 的系统消息），相同内容得到相同 ID
pub fn derived_msg_id(parts: &[&str]) -> String {
    let name = parts.join("\u{1f}");
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, name.as_bytes())
        .simple()
        .to_string()
}

/// 毫秒时间戳转 "HH:MM" 展示文本
pub fn time_label(ts_ms: i64) -> String {
    match Local.timestamp_millis_opt(ts_ms).single() {
        Some(t) => t.format("%H:%M").to_string(),
        None => String::new(),
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 名称首字母（最多两个），用于会话头像占位
pub fn initials(name: &str) -> String {
    let mut out: String = name
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-' || c == '.')
        .filter_map(|part| part.chars().next())
        .take(2)
        .flat_map(|c| c.to_uppercase())
        .collect();
    if out.is_empty() {
        out.push('?');
    }
    out
}

/// 载荷前 16 字节的十六进制预览
pub fn payload_preview(payload: &[u8]) -> String {
    let head = &payload[..payload.len().min(16)];
    let mut s = hex::encode(head);
    if payload.len() > head.len() {
        s.push('…');
    }
    s
}

/// 文件大小的展示文本
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_hex_is_input_error() {
        assert!(matches!(hex_to_bytes("zz"), Err(BridgeError::InvalidInput(_))));
        assert!(matches!(hex_to_bytes("  "), Err(BridgeError::InvalidInput(_))));
        assert!(matches!(
            call_id_from_hex("abcd"),
            Err(BridgeError::InvalidInput(_))
        ));
        let id = call_id_from_hex("000102030405060708090a0b0c0d0e0f").unwrap();
        assert_eq!(id[15], 0x0f);
        assert_eq!(call_id_to_hex(&id), "000102030405060708090a0b0c0d0e0f");
    }

    #[test]
    fn coordinates_convert_to_e7() {
        assert_eq!(coordinate_to_e7(31.2304, 90.0).unwrap(), 312_304_000);
        assert!(coordinate_to_e7(f64::NAN, 90.0).is_err());
        assert!(coordinate_to_e7(f64::INFINITY, 180.0).is_err());
        assert!(coordinate_to_e7(91.0, 90.0).is_err());
    }

    #[test]
    fn initials_and_sizes() {
        assert_eq!(initials("alice smith"), "AS");
        assert_eq!(initials("bob"), "B");
        assert_eq!(initials(""), "?");
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
    }

    #[test]
    fn preview_is_truncated() {
        let payload = vec![0xabu8; 20];
        let preview = payload_preview(&payload);
        assert!(preview.ends_with('…'));
        assert_eq!(preview.chars().count(), 33);
    }

    #[test]
    fn derived_ids_are_stable() {
        let a = derived_msg_id(&["g1", "Join", "bob", ""]);
        assert_eq!(a, derived_msg_id(&["g1", "Join", "bob", ""]));
        assert_ne!(a, derived_msg_id(&["g1", "Join", "bo", "b"]));
        assert_eq!(a.len(), 32);
    }
}
