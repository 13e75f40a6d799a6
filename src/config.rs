use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::kalman_filter::KalmanParams;
use crate::types::{
    rate_period, MotorRange, SensorRange, DEFAULT_MOTOR_COUNT, DEFAULT_SAMPLE_RATE_HZ,
    DEFAULT_SENSOR_COUNT, MAX_RATE_HZ, MIN_RATE_HZ, UI_REFRESH_HZ,
};
use crate::user::{DuplicatePolicy, UserError, UserProfile};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Parámetros fijos del sistema; no cambian mientras corre el traductor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sensores del guante (longitud de cada vector de muestras)
    pub sensor_count: usize,
    /// Motores de la mano (longitud de cada comando)
    pub motor_count: usize,
    /// Rango válido de accionamiento de los motores
    pub motor_range: MotorRange,
    /// Dominio por defecto de sensores sin calibrar
    pub default_sensor_range: SensorRange,
    /// Política ante registros sensor→motor repetidos
    pub duplicate_policy: DuplicatePolicy,
    pub kalman: KalmanParams,
    /// Baudios de los puertos serie del guante y la mano
    pub baud_rate: u32,
    /// Frecuencia de reproducción si el archivo no la declara (Hz)
    pub replay_rate_hz: f64,
    /// Terminar la calibración sola tras N muestras (`None` = sólo manual)
    pub calibration_auto_stop_samples: Option<usize>,
    /// Capacidad de la cola de eventos del pipeline
    pub event_queue_capacity: usize,
    /// Refresco del observador pasivo (Hz)
    pub ui_refresh_hz: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sensor_count: DEFAULT_SENSOR_COUNT,
            motor_count: DEFAULT_MOTOR_COUNT,
            motor_range: MotorRange::default(),
            default_sensor_range: SensorRange::default(),
            duplicate_policy: DuplicatePolicy::default(),
            kalman: KalmanParams::default(),
            baud_rate: 115_200,
            replay_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            calibration_auto_stop_samples: None,
            event_queue_capacity: 100,
            ui_refresh_hz: UI_REFRESH_HZ,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sensor_count == 0 {
            return Err(ConfigError::Invalid("sensor_count must be > 0".into()));
        }
        if self.motor_count == 0 {
            return Err(ConfigError::Invalid("motor_count must be > 0".into()));
        }
        if self.motor_range.min >= self.motor_range.max {
            return Err(ConfigError::Invalid(format!(
                "motor_range vacío: [{}, {}]",
                self.motor_range.min, self.motor_range.max
            )));
        }
        if self.default_sensor_range.is_degenerate() {
            return Err(ConfigError::Invalid(format!(
                "default_sensor_range vacío: [{}, {}]",
                self.default_sensor_range.min, self.default_sensor_range.max
            )));
        }
        for (name, rate) in [("replay_rate_hz", self.replay_rate_hz), ("ui_refresh_hz", self.ui_refresh_hz)] {
            if rate_period(rate).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "{} fuera de rango: {} (admitido {}..={} Hz)",
                    name, rate, MIN_RATE_HZ, MAX_RATE_HZ
                )));
            }
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::Invalid("event_queue_capacity must be > 0".into()));
        }
        if self.kalman.measurement_noise < 0.0 || self.kalman.process_noise < 0.0 {
            return Err(ConfigError::Invalid("kalman noise must be >= 0".into()));
        }
        Ok(())
    }

    /// Carga un perfil guardado. La política de duplicados guardada en el perfil
    /// manda sobre `duplicate_policy` de la configuración.
    pub fn load_user(&self, path: impl AsRef<Path>) -> Result<UserProfile, UserError> {
        let user = UserProfile::load(path)?;
        if user.duplicate_policy() != self.duplicate_policy {
            warn!(
                profile = ?user.duplicate_policy(),
                config = ?self.duplicate_policy,
                "el perfil usa otra política de duplicados; se respeta la del perfil"
            );
        }
        Ok(user)
    }

    /// Perfil inicial: conformidad 1:1 hasta min(sensores, motores), sin calibrar
    pub fn default_user(&self) -> UserProfile {
        UserProfile::with_identity_conformity(
            self.sensor_count.min(self.motor_count),
            self.duplicate_policy,
            self.default_sensor_range,
        )
    }
}
