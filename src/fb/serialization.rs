//! 序列化工具：本地消息 ID 生成与附件列表 JSON 编解码

use crate::fb::message::types::Attachment;
use uuid::Uuid;

/// 本地乐观消息 ID 前缀
pub const LOCAL_MSG_ID_PREFIX: &str = "local_";

/// 生成本地临时消息 ID（发送成功后由 Graph 返回的 ID 替换）
pub fn generate_local_msg_id() -> String {
    format!("{}{}", LOCAL_MSG_ID_PREFIX, Uuid::new_v4())
}

/// 判断是否是本地临时消息 ID
pub fn is_local_msg_id(id: &str) -> bool {
    id.starts_with(LOCAL_MSG_ID_PREFIX)
}

/// 将附件列表序列化为 JSON 文本（空列表返回 None，不落库）
pub fn serialize_attachments(list: &[Attachment]) -> Option<String> {
    if list.is_empty() {
        return None;
    }
    serde_json::to_string(list).ok()
}

/// 从 JSON 文本反序列化附件列表（解析失败按无附件处理）
pub fn deserialize_attachments(raw: Option<&str>) -> Vec<Attachment> {
    match raw {
        Some(s) if !s.is_empty() => serde_json::from_str(s).unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_msg_id() {
        let id = generate_local_msg_id();
        assert!(is_local_msg_id(&id));
        assert!(!is_local_msg_id("m_abc123"));
    }

    #[test]
    fn test_attachments_roundtrip() {
        assert!(serialize_attachments(&[]).is_none());

        let list = vec![Attachment {
            id: "att1".to_string(),
            mime_type: "image/jpeg".to_string(),
            name: "photo.jpg".to_string(),
            ..Default::default()
        }];
        let raw = serialize_attachments(&list).unwrap();
        let parsed = deserialize_attachments(Some(&raw));
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, "att1");

        // 脏数据按无附件处理
        assert!(deserialize_attachments(Some("not json")).is_empty());
        assert!(deserialize_attachments(None).is_empty());
    }
}
