//! Perfil del usuario: qué motores mueve cada sensor y el rango calibrado de
//! cada sensor. Ambas tablas se indexan por sensor, no por orden de inserción.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::types::SensorRange;

#[derive(Error, Debug)]
pub enum UserError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Qué hacer cuando se registra dos veces el mismo par sensor→motor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// El segundo registro se ignora
    #[default]
    Idempotent,
    /// El motor aparece dos veces en la lista (se escribe dos veces por tick)
    Cumulative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    duplicate_policy: DuplicatePolicy,
    /// Rango usado por sensores que nunca se calibraron
    #[serde(default)]
    default_range: SensorRange,
    /// sensor → motores que acciona
    #[serde(default)]
    conformity: BTreeMap<usize, Vec<usize>>,
    /// sensor → rango calibrado
    #[serde(default)]
    ranges: BTreeMap<usize, SensorRange>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default(), SensorRange::default())
    }
}

impl UserProfile {
    pub fn new(duplicate_policy: DuplicatePolicy, default_range: SensorRange) -> Self {
        Self {
            duplicate_policy,
            default_range,
            conformity: BTreeMap::new(),
            ranges: BTreeMap::new(),
        }
    }

    /// Perfil con conformidad 1:1 (sensor i → motor i) para los primeros `count` índices
    pub fn with_identity_conformity(
        count: usize,
        duplicate_policy: DuplicatePolicy,
        default_range: SensorRange,
    ) -> Self {
        let mut user = Self::new(duplicate_policy, default_range);
        for i in 0..count {
            user.add_sensor_motor_conformity(i, i);
        }
        user
    }

    /// Registra que `sensor` acciona `motor`
    pub fn add_sensor_motor_conformity(&mut self, sensor: usize, motor: usize) {
        let motors = self.conformity.entry(sensor).or_default();
        if self.duplicate_policy == DuplicatePolicy::Idempotent && motors.contains(&motor) {
            return;
        }
        motors.push(motor);
    }

    pub fn motor_list(&self, sensor: usize) -> &[usize] {
        self.conformity
            .get(&sensor)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Sensores con al menos un motor, en orden de índice
    pub fn conformity(&self) -> impl Iterator<Item = (usize, &[usize])> + '_ {
        self.conformity
            .iter()
            .map(|(&sensor, motors)| (sensor, motors.as_slice()))
    }

    pub fn set_sensor_range(&mut self, sensor: usize, range: SensorRange) {
        self.ranges.insert(sensor, range);
    }

    /// Agrega un rango para el sensor siguiente al último calibrado y devuelve su índice
    pub fn add_dof(&mut self, min: i32, max: i32) -> usize {
        let sensor = self.ranges.keys().next_back().map_or(0, |&last| last + 1);
        self.ranges.insert(sensor, SensorRange::new(min, max));
        sensor
    }

    /// Rango calibrado del sensor, o el rango por defecto si nunca se calibró
    pub fn sensor_range(&self, sensor: usize) -> SensorRange {
        self.ranges.get(&sensor).copied().unwrap_or(self.default_range)
    }

    pub fn is_calibrated(&self, sensor: usize) -> bool {
        self.ranges.contains_key(&sensor)
    }

    pub fn sensor_min(&self, sensor: usize) -> i32 {
        self.sensor_range(sensor).min
    }

    pub fn sensor_max(&self, sensor: usize) -> i32 {
        self.sensor_range(sensor).max
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate_policy
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, UserError> {
        let content = fs::read_to_string(path.as_ref())?;
        let user: UserProfile = serde_json::from_str(&content)?;
        info!(path = %path.as_ref().display(), sensors = user.ranges.len(), "perfil cargado");
        Ok(user)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), UserError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json)?;
        info!(path = %path.as_ref().display(), "perfil guardado");
        Ok(())
    }
}
