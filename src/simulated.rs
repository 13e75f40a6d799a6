//! Dispositivos simulados para correr el traductor sin hardware.

use std::f64::consts::TAU;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Sender};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::devices::{DeviceError, GloveSource, HandSink, Notifier};
use crate::types::{rate_period, MotorCommand, SampleVector, SensorRange};

/// Guante sintético: cada dedo se flexiona con una senoide desfasada más
/// ruido uniforme, a frecuencia fija.
pub struct SimulatedGlove {
    sensor_count: usize,
    rate_hz: f64,
    range: SensorRange,
    noise: i32,
    connected: bool,
    latest: Arc<Mutex<SampleVector>>,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedGlove {
    pub fn new(sensor_count: usize, rate_hz: f64, range: SensorRange, noise: i32) -> Self {
        Self {
            sensor_count,
            rate_hz,
            range,
            noise: noise.max(0),
            connected: false,
            latest: Arc::new(Mutex::new(vec![range.min; sensor_count])),
            stop_tx: None,
            worker: None,
        }
    }
}

/// Valor sintético del sensor `idx` en el instante `t` (sin ruido)
fn flex_at(idx: usize, t: f64, range: SensorRange) -> f64 {
    let mid = (f64::from(range.min) + f64::from(range.max)) / 2.0;
    let amp = range.width() as f64 * 0.4;
    // Un ciclo de cierre/apertura cada ~2 s, dedos desfasados
    let phase = idx as f64 * 0.7;
    mid + amp * (TAU * 0.5 * t + phase).sin()
}

/// Muestra entera del sensor `idx` con ruido, siempre dentro de `range`
fn sample_at(idx: usize, t: f64, range: SensorRange, jitter: i32) -> i32 {
    (flex_at(idx, t, range).round() as i32)
        .saturating_add(jitter)
        .clamp(range.min, range.max)
}

impl GloveSource for SimulatedGlove {
    fn connect(&mut self, port: &str) -> Result<(), DeviceError> {
        info!(port, "guante simulado conectado");
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn start_streaming(&mut self, notifier: Notifier) {
        self.stop_streaming();
        if !self.connected {
            return;
        }

        let Some(interval) = rate_period(self.rate_hz) else {
            warn!(rate_hz = self.rate_hz, "frecuencia del guante simulado fuera de rango");
            return;
        };
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let latest = Arc::clone(&self.latest);
        let sensor_count = self.sensor_count;
        let range = self.range;
        let noise = self.noise;

        self.stop_tx = Some(stop_tx);
        self.worker = Some(std::thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let start = Instant::now();
            let ticker = tick(interval);
            loop {
                select! {
                    recv(ticker) -> _ => {
                        let t = start.elapsed().as_secs_f64();
                        let sample: SampleVector = (0..sensor_count)
                            .map(|i| {
                                let jitter = if noise > 0 { rng.gen_range(-noise..=noise) } else { 0 };
                                sample_at(i, t, range, jitter)
                            })
                            .collect();
                        match latest.lock() {
                            Ok(mut slot) => *slot = sample,
                            Err(poisoned) => *poisoned.into_inner() = sample,
                        }
                        notifier.notify();
                    }
                    recv(stop_rx) -> _ => break,
                }
            }
        }));
        debug!("guante simulado emitiendo");
    }

    fn stop_streaming(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    fn is_streaming(&self) -> bool {
        self.worker.is_some()
    }

    fn current_sample(&self) -> SampleVector {
        match self.latest.lock() {
            Ok(sample) => sample.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Drop for SimulatedGlove {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}

/// Mano que sólo registra los comandos recibidos
#[derive(Debug, Default)]
pub struct ConsoleHand {
    connected: bool,
    accepting: bool,
    last: Option<MotorCommand>,
    received: u64,
}

impl ConsoleHand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_command(&self) -> Option<&[i32]> {
        self.last.as_deref()
    }

    pub fn received(&self) -> u64 {
        self.received
    }
}

impl HandSink for ConsoleHand {
    fn connect(&mut self, port: &str) -> Result<(), DeviceError> {
        info!(port, "mano simulada conectada");
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn start_accepting(&mut self) {
        self.accepting = true;
    }

    fn stop_accepting(&mut self) {
        self.accepting = false;
    }

    fn send(&mut self, command: &[i32]) {
        if !self.connected || !self.accepting {
            return;
        }
        debug!(?command, "mano simulada");
        self.last = Some(command.to_vec());
        self.received += 1;
    }
}
