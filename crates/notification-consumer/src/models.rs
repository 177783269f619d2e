//! 通知数据模型
//!
//! 线上格式为 JSON：
//! `{"from": {"id": 1, "name": "Emma"}, "to": {"id": 2, "name": "Bruno"}, "message": "...", "sentAt": "..."}`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 通知参与方（发送者或接收者）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    pub name: String,
}

/// 解码后的通知记录
///
/// 构造后不再修改；在收件人日志中的位置即为其唯一标识。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub from: Participant,
    pub to: Participant,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl NotificationRecord {
    pub fn new(from: Participant, to: Participant, message: impl Into<String>) -> Self {
        Self {
            from,
            to,
            message: message.into(),
            sent_at: None,
        }
    }

    pub fn with_sent_at(mut self, sent_at: DateTime<Utc>) -> Self {
        self.sent_at = Some(sent_at);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_wire_payload() {
        let payload = r#"{
            "from": {"id": 1, "name": "Emma"},
            "to": {"id": 2, "name": "Bruno"},
            "message": "Emma started following you"
        }"#;

        let record: NotificationRecord = serde_json::from_str(payload).unwrap();
        assert_eq!(record.from.name, "Emma");
        assert_eq!(record.to.id, 2);
        assert_eq!(record.message, "Emma started following you");
        assert!(record.sent_at.is_none());
    }

    #[test]
    fn test_sent_at_camel_case() {
        let sent_at = DateTime::parse_from_rfc3339("2025-01-15T10:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let record = NotificationRecord::new(
            Participant { id: 1, name: "Emma".to_string() },
            Participant { id: 2, name: "Bruno".to_string() },
            "hello",
        )
        .with_sent_at(sent_at);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["sentAt"], "2025-01-15T10:30:00Z");

        let decoded: NotificationRecord = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_absent_sent_at_not_serialized() {
        let record = NotificationRecord::new(
            Participant { id: 1, name: "Emma".to_string() },
            Participant { id: 2, name: "Bruno".to_string() },
            "hello",
        );
        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("sentAt").is_none());
    }

    #[test]
    fn test_missing_message_rejected() {
        let payload = r#"{"from": {"id": 1, "name": "Emma"}, "to": {"id": 2, "name": "Bruno"}}"#;
        assert!(serde_json::from_str::<NotificationRecord>(payload).is_err());
    }
}
