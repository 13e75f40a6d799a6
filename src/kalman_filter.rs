//! Filtro de Kalman escalar por sensor.
//!
//! Modelo de paseo aleatorio: el valor real de flexión cambia lentamente
//! (ruido de proceso `Q`) y cada lectura del ADC trae ruido de medición `R`.
//! Cada corrección es una combinación convexa entre la estimación previa y la
//! lectura nueva, así que la estimación nunca sale del rango de las lecturas.

use serde::{Deserialize, Serialize};

/// Parámetros de ruido del filtro
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KalmanParams {
    /// Ruido de proceso Q (más alto = más reactivo)
    pub process_noise: f64,
    /// Ruido de medición R (más alto = más suavizado)
    pub measurement_noise: f64,
    /// Covarianza inicial P0 tras la primera lectura
    pub initial_covariance: f64,
}

impl Default for KalmanParams {
    fn default() -> Self {
        Self {
            process_noise: 1.0,
            measurement_noise: 16.0,
            initial_covariance: 16.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ScalarEstimator {
    estimate: f64,
    covariance: f64,
    seeded: bool,
}

impl ScalarEstimator {
    fn correct(&mut self, measurement: f64, params: &KalmanParams) {
        if !self.seeded {
            self.estimate = measurement;
            self.covariance = params.initial_covariance;
            self.seeded = true;
            return;
        }

        // Predicción: x = x, P = P + Q
        let predicted_cov = self.covariance + params.process_noise;

        // Ganancia K = P / (P + R), siempre en [0, 1]
        let denom = predicted_cov + params.measurement_noise;
        let gain = if denom > 0.0 {
            (predicted_cov / denom).clamp(0.0, 1.0)
        } else {
            1.0
        };

        self.estimate += gain * (measurement - self.estimate);
        self.covariance = (1.0 - gain) * predicted_cov;
    }
}

/// Banco de estimadores, uno por sensor del guante
#[derive(Debug, Clone)]
pub struct KalmanFilter {
    params: KalmanParams,
    estimators: Vec<ScalarEstimator>,
}

impl KalmanFilter {
    pub fn new(sensor_count: usize, params: KalmanParams) -> Self {
        Self {
            params,
            estimators: vec![ScalarEstimator::default(); sensor_count],
        }
    }

    /// Incorpora un vector de lecturas crudas
    pub fn correct(&mut self, raw: &[i32]) {
        if raw.len() > self.estimators.len() {
            self.estimators.resize(raw.len(), ScalarEstimator::default());
        }

        for (estimator, &value) in self.estimators.iter_mut().zip(raw) {
            estimator.correct(f64::from(value), &self.params);
        }
    }

    /// Mejor estimación actual, redondeada al entero más cercano
    pub fn state(&self) -> Vec<i32> {
        self.estimators
            .iter()
            .map(|e| e.estimate.round() as i32)
            .collect()
    }

    /// Olvida todo el historial (la próxima lectura vuelve a sembrar)
    pub fn reset(&mut self) {
        for estimator in &mut self.estimators {
            *estimator = ScalarEstimator::default();
        }
    }

    pub fn len(&self) -> usize {
        self.estimators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.estimators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_first_sample_seeds_estimate() {
        let mut filter = KalmanFilter::new(4, KalmanParams::default());
        filter.correct(&[0, 50, 100, 25]);
        assert_eq!(filter.state(), vec![0, 50, 100, 25]);
    }

    #[test]
    fn test_converges_to_step() {
        let mut filter = KalmanFilter::new(1, KalmanParams::default());
        filter.correct(&[0]);

        let mut ticks = 0;
        while filter.state()[0] != 100 {
            filter.correct(&[100]);
            ticks += 1;
            assert!(ticks < 60, "no converge en 60 ticks");
        }

        // Una vez alcanzado, se queda ahí
        for _ in 0..10 {
            filter.correct(&[100]);
            assert_eq!(filter.state()[0], 100);
        }
    }

    #[test]
    fn test_never_leaves_observed_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut filter = KalmanFilter::new(3, KalmanParams::default());
        let mut lo = [i32::MAX; 3];
        let mut hi = [i32::MIN; 3];

        for _ in 0..2000 {
            let raw: Vec<i32> = (0..3).map(|_| rng.gen_range(-500..1500)).collect();
            for s in 0..3 {
                lo[s] = lo[s].min(raw[s]);
                hi[s] = hi[s].max(raw[s]);
            }
            filter.correct(&raw);
            for (s, value) in filter.state().into_iter().enumerate() {
                assert!(value >= lo[s] && value <= hi[s], "sensor {} divergió: {}", s, value);
            }
        }
    }

    #[test]
    fn test_attenuates_alternating_noise() {
        let mut filter = KalmanFilter::new(1, KalmanParams::default());
        for i in 0..200 {
            let noisy = if i % 2 == 0 { 520 } else { 480 };
            filter.correct(&[noisy]);
        }
        let estimate = filter.state()[0];
        assert!((estimate - 500).abs() <= 5, "estimación {}", estimate);
    }

    #[test]
    fn test_grows_with_longer_input() {
        let mut filter = KalmanFilter::new(2, KalmanParams::default());
        filter.correct(&[1, 2, 3]);
        assert_eq!(filter.len(), 3);
        assert_eq!(filter.state(), vec![1, 2, 3]);

        filter.correct(&[1]);
        assert_eq!(filter.state()[2], 3);
    }

    #[test]
    fn test_reset_reseeds() {
        let mut filter = KalmanFilter::new(1, KalmanParams::default());
        filter.correct(&[10]);
        filter.reset();
        filter.correct(&[900]);
        assert_eq!(filter.state(), vec![900]);
    }
}
