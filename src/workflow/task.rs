//! Per-task state carried by the Workflow Engine (C8).

use crate::protocol::Direction;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Created,
    HeightMeasured,
    Moving,
    Scanning,
    OrderPending,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Full lifecycle record for one outbound task. Once `status` reaches a
/// terminal value no other field is mutated again.
#[derive(Debug, Clone)]
pub struct TaskState {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub direction: Direction,
    pub stack_height: f64,
    pub measured_height: Option<f64>,
    pub target_position_mm: Option<f64>,
    pub codes: Vec<String>,
    pub order_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskState {
    pub fn new(task_id: Uuid, direction: Direction) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            status: TaskStatus::Created,
            direction,
            stack_height: 0.0,
            measured_height: None,
            target_position_mm: None,
            codes: Vec::new(),
            order_id: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Geometry constants needed to translate a measured stack height into an
/// axis target position, and the legacy millimetre-to-pulse factor used
/// downstream by the Motion Adapter.
#[derive(Debug, Clone, Copy)]
pub struct GeometryConfig {
    pub height_init_mm: f64,
    pub tray_height_mm: f64,
    pub camera_height_mm: f64,
    pub coder_height_mm: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            height_init_mm: 0.0,
            tray_height_mm: 0.0,
            camera_height_mm: 0.0,
            coder_height_mm: 0.0,
        }
    }
}

impl GeometryConfig {
    /// Target axis position for the given direction and measured stack
    /// height. The reference frame is `height_init_mm`, offset by the
    /// fixed camera mount height and the destination shelf (tray for an
    /// outbound pick, coder station for an inbound scan).
    pub fn target_position_mm(&self, direction: Direction, measured_height: f64) -> f64 {
        let destination = match direction {
            Direction::In => self.coder_height_mm,
            Direction::Out => self.tray_height_mm,
        };
        self.height_init_mm - measured_height + destination - self.camera_height_mm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_task_starts_in_created_state_with_no_measurements() {
        let task = TaskState::new(Uuid::new_v4(), Direction::Out);
        assert_eq!(task.status, TaskStatus::Created);
        assert!(task.measured_height.is_none());
        assert!(task.codes.is_empty());
    }

    #[test]
    fn terminal_states_are_recognised() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Scanning.is_terminal());
    }

    #[test]
    fn target_position_differs_by_direction() {
        let geometry = GeometryConfig {
            height_init_mm: 1000.0,
            tray_height_mm: 200.0,
            camera_height_mm: 50.0,
            coder_height_mm: 300.0,
        };
        let inbound = geometry.target_position_mm(Direction::In, 400.0);
        let outbound = geometry.target_position_mm(Direction::Out, 400.0);
        assert_ne!(inbound, outbound);
        assert_eq!(inbound, 1000.0 - 400.0 + 300.0 - 50.0);
        assert_eq!(outbound, 1000.0 - 400.0 + 200.0 - 50.0);
    }
}
