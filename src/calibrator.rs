use crate::types::SensorRange;

/// Acumulador de mínimos/máximos por sensor durante una sesión de calibración
///
/// El calibrador no toca el perfil de usuario: al terminar la sesión el
/// traductor lee `observed_ranges()` y los vuelca al perfil.
#[derive(Debug, Clone, Default)]
pub struct Calibrator {
    active: bool,
    samples_seen: usize,
    /// Índice = sensor; `None` mientras el sensor no haya reportado nada
    observed: Vec<Option<SensorRange>>,
}

impl Calibrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reinicia todos los acumuladores y abre una sesión nueva
    pub fn start_calibrate(&mut self) {
        self.observed.clear();
        self.samples_seen = 0;
        self.active = true;
    }

    /// Cierra la sesión. Los acumuladores quedan legibles hasta el próximo `start_calibrate`
    pub fn stop_calibrate(&mut self) {
        self.active = false;
    }

    /// Incorpora un vector filtrado. Sin sesión abierta no hace nada
    pub fn write_data(&mut self, values: &[i32]) {
        if !self.active {
            return;
        }

        if values.len() > self.observed.len() {
            self.observed.resize(values.len(), None);
        }

        for (slot, &value) in self.observed.iter_mut().zip(values) {
            *slot = Some(match *slot {
                Some(range) => SensorRange::new(range.min.min(value), range.max.max(value)),
                None => SensorRange::new(value, value),
            });
        }

        self.samples_seen += 1;
    }

    /// Mínimos observados; la lista puede ser más corta que el número de sensores
    pub fn min_calibrated_list(&self) -> Vec<Option<i32>> {
        self.observed.iter().map(|r| r.map(|r| r.min)).collect()
    }

    /// Máximos observados; misma forma que `min_calibrated_list`
    pub fn max_calibrated_list(&self) -> Vec<Option<i32>> {
        self.observed.iter().map(|r| r.map(|r| r.max)).collect()
    }

    /// Pares (sensor, rango) de los sensores que reportaron al menos una vez
    pub fn observed_ranges(&self) -> impl Iterator<Item = (usize, SensorRange)> + '_ {
        self.observed
            .iter()
            .enumerate()
            .filter_map(|(idx, range)| range.map(|r| (idx, r)))
    }

    pub fn samples_seen(&self) -> usize {
        self.samples_seen
    }

    /// `true` cuando la sesión acumuló al menos `target` vectores
    pub fn is_complete(&self, target: usize) -> bool {
        self.active && target > 0 && self.samples_seen >= target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracks_min_and_max_per_sensor() {
        let mut calibrator = Calibrator::new();
        calibrator.start_calibrate();

        for v in [10, 50, 90, 5] {
            calibrator.write_data(&[v, 100 - v]);
        }

        assert_eq!(calibrator.min_calibrated_list(), vec![Some(5), Some(10)]);
        assert_eq!(calibrator.max_calibrated_list(), vec![Some(90), Some(95)]);
        assert_eq!(calibrator.samples_seen(), 4);
    }

    #[test]
    fn test_restart_clears_accumulation() {
        let mut calibrator = Calibrator::new();
        calibrator.start_calibrate();
        calibrator.write_data(&[0, 1000]);
        calibrator.start_calibrate();

        assert!(calibrator.min_calibrated_list().is_empty());
        calibrator.write_data(&[400, 600]);
        assert_eq!(calibrator.min_calibrated_list(), vec![Some(400), Some(600)]);
        assert_eq!(calibrator.max_calibrated_list(), vec![Some(400), Some(600)]);
    }

    #[test]
    fn test_ignores_data_while_idle() {
        let mut calibrator = Calibrator::new();
        calibrator.write_data(&[1, 2, 3]);
        assert!(calibrator.min_calibrated_list().is_empty());

        calibrator.start_calibrate();
        calibrator.write_data(&[7]);
        calibrator.stop_calibrate();
        calibrator.write_data(&[-100]);
        assert_eq!(calibrator.min_calibrated_list(), vec![Some(7)]);
    }

    #[test]
    fn test_short_vectors_leave_other_sensors_untouched() {
        let mut calibrator = Calibrator::new();
        calibrator.start_calibrate();
        calibrator.write_data(&[10, 20, 30]);
        calibrator.write_data(&[0]);

        let ranges: Vec<_> = calibrator.observed_ranges().collect();
        assert_eq!(
            ranges,
            vec![
                (0, SensorRange::new(0, 10)),
                (1, SensorRange::new(20, 20)),
                (2, SensorRange::new(30, 30)),
            ]
        );
    }

    #[test]
    fn test_completion_target() {
        let mut calibrator = Calibrator::new();
        assert!(!calibrator.is_complete(2));
        calibrator.start_calibrate();
        calibrator.write_data(&[1]);
        assert!(!calibrator.is_complete(2));
        calibrator.write_data(&[2]);
        assert!(calibrator.is_complete(2));
        assert!(!calibrator.is_complete(0));
    }
}
