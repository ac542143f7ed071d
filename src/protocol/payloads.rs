//! Concrete payload shapes carried inside `Envelope.data` for each topic key
//! named in §6 of the wire contract.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorTrigger {
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionHeightRequest {
    pub task_id: Uuid,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionHeightResult {
    pub min_height: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectedObjectType {
    Package,
    Qrcode,
    Barcode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedObject {
    #[serde(rename = "type")]
    pub object_type: DetectedObjectType,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionDetection {
    pub task_id: Uuid,
    pub detected_objects: Vec<DetectedObject>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionMove {
    pub task_id: Uuid,
    pub position_mm: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionComplete {
    pub task_id: Uuid,
    pub final_position: i64,
    pub success: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoderStart {
    pub direction: Direction,
    pub stack_height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoderResult {
    pub task_id: Uuid,
    pub code: String,
    pub code_type: String,
    pub confidence: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoderComplete {
    pub direction: Direction,
    pub stack_height: f64,
    pub codes: Vec<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderNew {
    pub order_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoderOdoo {
    pub order_id: String,
    pub codes: Vec<String>,
    pub direction: Direction,
    pub stack_height: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHeartbeat {
    pub source: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sensor_trigger_round_trips_through_camel_case_json() {
        let payload = SensorTrigger {
            direction: Direction::Out,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value, json!({"direction": "out"}));
        let back: SensorTrigger = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn coder_complete_omits_error_message_when_absent() {
        let payload = CoderComplete {
            direction: Direction::In,
            stack_height: 1.2,
            codes: vec!["CODE-A".to_string()],
            timestamp: chrono::Utc::now(),
            success: true,
            error_message: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert!(!value.as_object().unwrap().contains_key("errorMessage"));
    }

    #[test]
    fn detected_object_type_renames_to_lowercase() {
        let obj = DetectedObject {
            object_type: DetectedObjectType::Qrcode,
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
            confidence: 0.9,
            content: None,
        };
        let value = serde_json::to_value(&obj).unwrap();
        assert_eq!(value["type"], "qrcode");
    }
}
