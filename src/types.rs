use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lectura cruda del guante: un valor de flexión por sensor
pub type SampleVector = Vec<i32>;

/// Comando para la mano: un valor de posición por motor
pub type MotorCommand = Vec<i32>;

/// Constantes por defecto del hardware
pub const DEFAULT_SENSOR_COUNT: usize = 5;
pub const DEFAULT_MOTOR_COUNT: usize = 5;
pub const DEFAULT_MOTOR_MIN: i32 = 0;
pub const DEFAULT_MOTOR_MAX: i32 = 255;
/// Rango del ADC de 10 bits del guante, usado antes de calibrar
pub const DEFAULT_SENSOR_MIN: i32 = 0;
pub const DEFAULT_SENSOR_MAX: i32 = 1023;
pub const DEFAULT_SAMPLE_RATE_HZ: f64 = 50.0; // Hz
pub const UI_REFRESH_HZ: f64 = 33.0;
/// Frecuencias aceptadas para temporizadores, grabación y reproducción
pub const MIN_RATE_HZ: f64 = 0.01;
pub const MAX_RATE_HZ: f64 = 1000.0;

/// Periodo de una frecuencia en Hz. `None` fuera de [MIN_RATE_HZ, MAX_RATE_HZ]
pub fn rate_period(rate_hz: f64) -> Option<Duration> {
    if !(MIN_RATE_HZ..=MAX_RATE_HZ).contains(&rate_hz) {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / rate_hz).ok()
}

/// Rango calibrado de un sensor (dominio del mapeo)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorRange {
    pub min: i32,
    pub max: i32,
}

impl SensorRange {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    /// Un rango vacío (min >= max) no sirve como dominio de interpolación
    pub fn is_degenerate(&self) -> bool {
        self.min >= self.max
    }

    pub fn width(&self) -> i64 {
        i64::from(self.max) - i64::from(self.min)
    }
}

impl Default for SensorRange {
    fn default() -> Self {
        Self::new(DEFAULT_SENSOR_MIN, DEFAULT_SENSOR_MAX)
    }
}

/// Rango válido de accionamiento de los motores de la mano
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorRange {
    pub min: i32,
    pub max: i32,
}

impl MotorRange {
    pub const fn new(min: i32, max: i32) -> Self {
        Self { min, max }
    }

    pub fn clamp(&self, value: i32) -> i32 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: i32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

impl Default for MotorRange {
    fn default() -> Self {
        Self::new(DEFAULT_MOTOR_MIN, DEFAULT_MOTOR_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_range() {
        assert!(SensorRange::new(10, 10).is_degenerate());
        assert!(SensorRange::new(20, 10).is_degenerate());
        assert!(!SensorRange::new(5, 90).is_degenerate());
        assert_eq!(SensorRange::new(5, 90).width(), 85);
    }

    #[test]
    fn test_width_of_full_i32_range() {
        assert_eq!(
            SensorRange::new(i32::MIN, i32::MAX).width(),
            i64::from(u32::MAX)
        );
        assert_eq!(SensorRange::new(i32::MAX, i32::MIN).width(), -i64::from(u32::MAX));
    }

    #[test]
    fn test_rate_period_bounds() {
        let period = rate_period(50.0).unwrap();
        assert!((period.as_secs_f64() - 0.02).abs() < 1e-9);
        let slowest = rate_period(MIN_RATE_HZ).unwrap();
        assert!((slowest.as_secs_f64() - 100.0).abs() < 1e-6);
        assert!(rate_period(MAX_RATE_HZ).is_some());
        assert_eq!(rate_period(1e-300), None);
        assert_eq!(rate_period(0.0), None);
        assert_eq!(rate_period(-5.0), None);
        assert_eq!(rate_period(f64::NAN), None);
        assert_eq!(rate_period(f64::INFINITY), None);
        assert_eq!(rate_period(1e6), None);
    }

    #[test]
    fn test_motor_range_clamp() {
        let range = MotorRange::default();
        assert_eq!(range.clamp(-40), 0);
        assert_eq!(range.clamp(300), 255);
        assert!(range.contains(128));
        assert!(!range.contains(256));
    }
}
