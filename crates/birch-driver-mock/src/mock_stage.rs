//! Mock motion stage.

use anyhow::Result;
use async_trait::async_trait;
use birch_core::{Movement, SettingsMap};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};

use crate::faults::{Fault, FaultPlan};

/// Configuration for [`MockStage`], read from an instrument's `config` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockStageConfig {
    /// Name of the position column (default: "position")
    #[serde(default = "default_position_column")]
    pub position_column: String,

    /// Position units (default: "mm")
    #[serde(default = "default_units")]
    pub units: String,

    /// Initial position (default: 0.0)
    #[serde(default)]
    pub initial_position: f64,

    /// Time spent on every move in milliseconds (default: 0)
    #[serde(default)]
    pub settle_ms: u64,
}

fn default_position_column() -> String {
    "position".to_string()
}

fn default_units() -> String {
    "mm".to_string()
}

impl Default for MockStageConfig {
    fn default() -> Self {
        Self {
            position_column: default_position_column(),
            units: default_units(),
            initial_position: 0.0,
            settle_ms: 0,
        }
    }
}

/// Simulated single-axis stage.
///
/// Records every move so tests can check which axes the sweep touched, and
/// counts lifecycle calls.
///
/// # Example
///
/// ```rust,ignore
/// let stage = Arc::new(MockStage::new("piezo_x").with_column("X", "um"));
/// stage.move_to(2.5).await?;
/// assert_eq!(stage.moves(), vec![2.5]);
/// ```
pub struct MockStage {
    name: String,
    column: String,
    units: String,
    position: RwLock<f64>,
    settle: Duration,
    moves: Mutex<Vec<f64>>,
    settings: Mutex<SettingsMap>,
    connects: AtomicUsize,
    initializes: AtomicUsize,
    shutdowns: AtomicUsize,
    faults: FaultPlan,
}

impl MockStage {
    /// Instant stage at position 0 with column "position" in mm.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, MockStageConfig::default())
    }

    /// Stage built from configuration.
    pub fn with_config(name: impl Into<String>, config: MockStageConfig) -> Self {
        Self {
            name: name.into(),
            column: config.position_column,
            units: config.units,
            position: RwLock::new(config.initial_position),
            settle: Duration::from_millis(config.settle_ms),
            moves: Mutex::new(Vec::new()),
            settings: Mutex::new(SettingsMap::new()),
            connects: AtomicUsize::new(0),
            initializes: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            faults: FaultPlan::none(),
        }
    }

    /// Set position column name and units.
    pub fn with_column(mut self, column: impl Into<String>, units: impl Into<String>) -> Self {
        self.column = column.into();
        self.units = units.into();
        self
    }

    /// Sleep this long on every move.
    pub fn with_settle_time(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Fail the N-th move (1-based).
    pub fn fail_on_move(mut self, call: u32) -> Self {
        self.faults = self.faults.add(Fault::OnCall {
            operation: "move",
            call,
        });
        self
    }

    /// Fail every connect.
    pub fn with_connect_failure(mut self) -> Self {
        self.faults = self.faults.add(Fault::Always {
            operation: "connect",
        });
        self
    }

    /// Every target position passed to `move_to`, in call order.
    pub fn moves(&self) -> Vec<f64> {
        self.moves.lock().clone()
    }

    /// Settings received through `apply_settings`.
    pub fn applied_settings(&self) -> SettingsMap {
        self.settings.lock().clone()
    }

    /// Number of `connect` calls.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of `initialize` calls.
    pub fn initialize_count(&self) -> usize {
        self.initializes.load(Ordering::SeqCst)
    }

    /// Number of `shutdown` calls.
    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Movement for MockStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn position_column(&self) -> &str {
        &self.column
    }

    fn position_units(&self) -> &str {
        &self.units
    }

    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.faults.check(&self.name, "connect")?;
        tracing::debug!(stage = %self.name, "MockStage: connected");
        Ok(())
    }

    async fn initialize(&self) -> Result<()> {
        self.initializes.fetch_add(1, Ordering::SeqCst);
        self.faults.check(&self.name, "initialize")
    }

    async fn apply_settings(&self, settings: &SettingsMap) -> Result<()> {
        self.settings.lock().extend(settings.clone());
        Ok(())
    }

    async fn settings(&self) -> Result<SettingsMap> {
        Ok(self.settings.lock().clone())
    }

    async fn move_to(&self, position: f64) -> Result<()> {
        self.faults.check(&self.name, "move")?;
        self.moves.lock().push(position);

        if !self.settle.is_zero() {
            sleep(self.settle).await;
        }
        *self.position.write().await = position;

        tracing::debug!(stage = %self.name, "MockStage: reached {:.3}{}", position, self.units);
        Ok(())
    }

    async fn position(&self) -> Result<f64> {
        Ok(*self.position.read().await)
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.faults.check(&self.name, "shutdown")
    }
}

impl std::fmt::Debug for MockStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStage")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("units", &self.units)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_move_updates_position_and_log() {
        let stage = MockStage::new("x");
        assert_eq!(stage.position().await.unwrap(), 0.0);

        stage.move_to(10.0).await.unwrap();
        stage.move_to(25.0).await.unwrap();

        assert_eq!(stage.position().await.unwrap(), 25.0);
        assert_eq!(stage.moves(), vec![10.0, 25.0]);
    }

    #[tokio::test]
    async fn test_fail_on_move() {
        let stage = MockStage::new("x").fail_on_move(2);
        stage.move_to(1.0).await.unwrap();
        assert!(stage.move_to(2.0).await.is_err());
        assert_eq!(stage.position().await.unwrap(), 1.0);
    }

    #[test]
    fn test_config_defaults() {
        let config: MockStageConfig = toml::from_str("units = \"um\"").unwrap();
        assert_eq!(config.position_column, "position");
        assert_eq!(config.units, "um");
        assert_eq!(config.settle_ms, 0);
    }

    #[test]
    fn test_config_rejects_unknown_keys() {
        assert!(toml::from_str::<MockStageConfig>("speed = 3").is_err());
    }
}
