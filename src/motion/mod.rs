//! Motion Adapter (C10): drives a single positioning axis through a
//! pluggable [`Axis`] trait, enforcing position bounds and modelling
//! acceleration/timeout behaviour the way the vendor controller does.
//!
//! The concrete fieldbus driver is out of scope; [`SimulatedAxis`] stands in
//! for it in tests and local runs, with no physical side effects.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::{sleep, timeout, Duration};
use tracing::{error, info, warn};

/// Millimetre-to-pulse conversion. Legacy constant: do not change without
/// also updating `min_position`/`max_position` downstream.
pub const MM_TO_PULSES: f64 = 1000.0 * 100.0;

#[derive(Debug, Error)]
pub enum MotionError {
    #[error("axis already initialized")]
    AlreadyInitialized,
    #[error("axis not initialized")]
    NotInitialized,
    #[error("target {target} out of range [{min}, {max}]")]
    OutOfRange { target: i64, min: i64, max: i64 },
    #[error("axis driver error: {0}")]
    Driver(String),
    #[error("motion timed out after {0:?}")]
    Timeout(Duration),
}

/// Vendor-specific axis surface. The Motion Adapter never talks to hardware
/// directly; it drives whatever implements this trait.
#[async_trait]
pub trait Axis: Send + Sync {
    async fn initialize(&self) -> Result<(), MotionError>;
    async fn move_absolute(&self, position_pulses: i64, speed: f64, accel: f64) -> Result<(), MotionError>;
    async fn read_position(&self) -> Result<i64, MotionError>;
    async fn home(&self, speed: f64, accel: f64) -> Result<(), MotionError>;
    async fn stop(&self, decel: f64) -> Result<(), MotionError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct AxisStatus {
    pub position: i64,
    pub is_enabled: bool,
    pub is_moving: bool,
    pub has_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MotionAdapterConfig {
    pub min_position: i64,
    pub max_position: i64,
    pub default_speed: f64,
    /// Service-level ceiling on how long a single move may take before the
    /// adapter issues `stop()` and reports `has_error=true`.
    pub move_timeout: Duration,
}

impl Default for MotionAdapterConfig {
    fn default() -> Self {
        Self {
            min_position: 0,
            max_position: 220_000,
            default_speed: 50_000.0,
            move_timeout: Duration::from_secs(30),
        }
    }
}

struct SessionState {
    initialized: bool,
    current_position: i64,
    is_moving: bool,
    has_error: bool,
    error: Option<String>,
}

impl SessionState {
    fn uninitialized() -> Self {
        Self {
            initialized: false,
            current_position: 0,
            is_moving: false,
            has_error: false,
            error: None,
        }
    }
}

/// Drives one [`Axis`], enforcing `[min_position, max_position]` and
/// translating service-level timeouts into a stop + error status.
pub struct MotionAdapter {
    axis: Arc<dyn Axis>,
    config: MotionAdapterConfig,
    session: RwLock<SessionState>,
    op_lock: Mutex<()>,
}

impl MotionAdapter {
    pub fn new(axis: Arc<dyn Axis>, config: MotionAdapterConfig) -> Self {
        Self {
            axis,
            config,
            session: RwLock::new(SessionState::uninitialized()),
            op_lock: Mutex::new(()),
        }
    }

    pub async fn initialize(&self) -> Result<(), MotionError> {
        let _guard = self.op_lock.lock().await;
        if self.session.read().await.initialized {
            return Err(MotionError::AlreadyInitialized);
        }
        self.axis.initialize().await?;
        let mut session = self.session.write().await;
        session.initialized = true;
        session.has_error = false;
        session.error = None;
        info!("motion adapter initialized");
        Ok(())
    }

    pub async fn move_absolute(&self, position_pulses: i64, speed: Option<f64>) -> Result<(), MotionError> {
        let _guard = self.op_lock.lock().await;
        {
            let session = self.session.read().await;
            if !session.initialized {
                return Err(MotionError::NotInitialized);
            }
        }
        if position_pulses < self.config.min_position || position_pulses > self.config.max_position {
            return Err(MotionError::OutOfRange {
                target: position_pulses,
                min: self.config.min_position,
                max: self.config.max_position,
            });
        }

        let speed = speed.unwrap_or(self.config.default_speed);
        let accel = speed * 10.0;
        let start = self.session.read().await.current_position;

        {
            let mut session = self.session.write().await;
            session.is_moving = true;
        }

        // Lower-bound estimate used only to size the polling cadence; it
        // must never extend the configured service-level ceiling below.
        let expected = Duration::from_secs_f64(((position_pulses - start).unsigned_abs() as f64 / speed.max(1.0)).max(0.0));
        if expected > self.config.move_timeout {
            warn!(
                expected_s = expected.as_secs_f64(),
                move_timeout_s = self.config.move_timeout.as_secs_f64(),
                "requested speed makes the expected move duration exceed move_timeout; the ceiling still applies"
            );
        }
        let result = timeout(self.config.move_timeout, self.axis.move_absolute(position_pulses, speed, accel)).await;

        match result {
            Ok(Ok(())) => {
                let mut session = self.session.write().await;
                session.is_moving = false;
                session.current_position = position_pulses;
                session.has_error = false;
                session.error = None;
                Ok(())
            }
            Ok(Err(e)) => {
                self.mark_failed(&e.to_string()).await;
                Err(e)
            }
            Err(_) => {
                warn!(timeout_s = self.config.move_timeout.as_secs_f64(), "motion adapter: move timed out, issuing stop");
                let _ = self.axis.stop(accel).await;
                self.mark_failed("move timed out").await;
                Err(MotionError::Timeout(self.config.move_timeout))
            }
        }
    }

    pub async fn move_relative(&self, delta: i64, speed: Option<f64>) -> Result<(), MotionError> {
        let current = self.session.read().await.current_position;
        self.move_absolute(current + delta, speed).await
    }

    pub async fn home(&self, speed: Option<f64>) -> Result<(), MotionError> {
        self.move_absolute(0, speed).await
    }

    pub async fn stop(&self) -> Result<(), MotionError> {
        let speed = self.config.default_speed;
        self.axis.stop(speed * 10.0).await?;
        let mut session = self.session.write().await;
        session.is_moving = false;
        Ok(())
    }

    pub async fn get_status(&self) -> AxisStatus {
        let session = self.session.read().await;
        if !session.initialized {
            return AxisStatus {
                position: 0,
                is_enabled: false,
                is_moving: false,
                has_error: true,
                error: Some("uninitialized".to_string()),
                timestamp: Utc::now(),
            };
        }
        AxisStatus {
            position: session.current_position,
            is_enabled: true,
            is_moving: session.is_moving,
            has_error: session.has_error,
            error: session.error.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Homes first if not already at zero, then powers off. Idempotent.
    pub async fn shutdown(&self) -> Result<(), MotionError> {
        let (initialized, at_zero) = {
            let session = self.session.read().await;
            (session.initialized, session.current_position == 0)
        };
        if !initialized {
            return Ok(());
        }
        if !at_zero {
            self.home(None).await?;
        }
        let mut session = self.session.write().await;
        session.initialized = false;
        session.is_moving = false;
        info!("motion adapter shut down");
        Ok(())
    }

    async fn mark_failed(&self, error: &str) {
        error!(error, "motion adapter: move failed");
        let mut session = self.session.write().await;
        session.is_moving = false;
        session.has_error = true;
        session.error = Some(error.to_string());
    }
}

/// In-process stand-in for the vendor axis driver: moves complete after a
/// short simulated delay proportional to distance/speed, with no physical
/// side effects.
pub struct SimulatedAxis {
    position: RwLock<i64>,
    step_delay: Duration,
}

impl SimulatedAxis {
    pub fn new() -> Self {
        Self {
            position: RwLock::new(0),
            step_delay: Duration::from_millis(1),
        }
    }

    pub fn with_step_delay(step_delay: Duration) -> Self {
        Self {
            position: RwLock::new(0),
            step_delay,
        }
    }
}

impl Default for SimulatedAxis {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Axis for SimulatedAxis {
    async fn initialize(&self) -> Result<(), MotionError> {
        Ok(())
    }

    async fn move_absolute(&self, position_pulses: i64, _speed: f64, _accel: f64) -> Result<(), MotionError> {
        sleep(self.step_delay).await;
        *self.position.write().await = position_pulses;
        Ok(())
    }

    async fn read_position(&self) -> Result<i64, MotionError> {
        Ok(*self.position.read().await)
    }

    async fn home(&self, speed: f64, accel: f64) -> Result<(), MotionError> {
        self.move_absolute(0, speed, accel).await
    }

    async fn stop(&self, _decel: f64) -> Result<(), MotionError> {
        Ok(())
    }
}
