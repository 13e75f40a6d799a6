//! Traductor: conecta el guante, el filtro, la calibración, el perfil del
//! usuario, la mano y los archivos de acciones.
//!
//! Modos (uno activo a la vez):
//!   Idle         sin suscripciones
//!   LiveDrive    guante → filtro → perfil → mano (+ grabador)
//!   Replay       archivo → mano (+ grabador)
//!   Calibrating  guante → filtro → calibrador
//!
//! Cada cambio de modo desmonta primero el cableado anterior. El cableado
//! activo lleva un `epoch`; los eventos con otro epoch son restos de una
//! suscripción anterior y se descartan.

use std::path::{Path, PathBuf};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::calibrator::Calibrator;
use crate::config::{Config, ConfigError};
use crate::devices::{DeviceError, Devices, EventSource, Notifier, PipelineEvent};
use crate::kalman_filter::KalmanFilter;
use crate::range_map;
use crate::types::{MotorCommand, SampleVector};
use crate::user::UserProfile;

const NOTIFICATION_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum TranslatorError {
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Action file {0:?} is not well formed")]
    MalformedActionFile(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeKind {
    Idle,
    LiveDrive,
    Replay,
    Calibrating,
}

/// Suscripción activa de un modo
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wiring {
    pub epoch: u64,
    pub source: EventSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    LiveDrive(Wiring),
    Replay(Wiring),
    Calibrating(Wiring),
}

impl Mode {
    pub fn kind(&self) -> ModeKind {
        match self {
            Mode::Idle => ModeKind::Idle,
            Mode::LiveDrive(_) => ModeKind::LiveDrive,
            Mode::Replay(_) => ModeKind::Replay,
            Mode::Calibrating(_) => ModeKind::Calibrating,
        }
    }

    pub fn wiring(&self) -> Option<Wiring> {
        match *self {
            Mode::Idle => None,
            Mode::LiveDrive(w) | Mode::Replay(w) | Mode::Calibrating(w) => Some(w),
        }
    }
}

/// Avisos para observadores (p. ej. una interfaz)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    ConnectionStatusChanged { glove: bool, hand: bool },
    ModeChanged(ModeKind),
    /// Hay un vector filtrado nuevo en modo LiveDrive
    FilteredDataReady,
    /// Cambiaron los min/max de calibración o el perfil tras calibrar
    CalibrationUpdated,
    ReplayEnded,
}

/// Qué debe pasar después de un tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Continue,
    ReplayFinished,
    CalibrationComplete,
}

#[derive(Debug)]
struct RecordingSession {
    path: PathBuf,
    sample_rate_hz: f64,
}

pub struct Translator {
    config: Config,
    user: UserProfile,
    devices: Devices,
    mode: Mode,
    next_epoch: u64,
    recording: Option<RecordingSession>,

    filter: KalmanFilter,
    calibrator: Calibrator,

    sensor_data: SampleVector,
    filtered_data: SampleVector,
    converted_data: MotorCommand,

    events_tx: Sender<PipelineEvent>,
    events_rx: Receiver<PipelineEvent>,
    notify_tx: Sender<Notification>,
    notify_rx: Receiver<Notification>,

    ticks: u64,
    stale_events: u64,
}

impl Translator {
    pub fn new(config: Config, user: UserProfile, devices: Devices) -> Result<Self, TranslatorError> {
        config.validate()?;

        let (events_tx, events_rx) = bounded(config.event_queue_capacity);
        let (notify_tx, notify_rx) = bounded(NOTIFICATION_CAPACITY);

        Ok(Self {
            filter: KalmanFilter::new(config.sensor_count, config.kalman),
            calibrator: Calibrator::new(),
            sensor_data: vec![0; config.sensor_count],
            filtered_data: vec![0; config.sensor_count],
            converted_data: vec![config.motor_range.min; config.motor_count],
            config,
            user,
            devices,
            mode: Mode::Idle,
            next_epoch: 1,
            recording: None,
            events_tx,
            events_rx,
            notify_tx,
            notify_rx,
            ticks: 0,
            stale_events: 0,
        })
    }

    // ── Hardware ────────────────────────────────────────────────────────────

    pub fn connect_glove(&mut self, port: &str) -> Result<(), TranslatorError> {
        let result = self.devices.glove.connect(port);
        if let Err(e) = &result {
            warn!(port, "no se pudo conectar el guante: {}", e);
        }

        // Reconectar no cambia el modo: si el guante estaba suscrito se vuelve a suscribir
        if let Mode::LiveDrive(wiring) | Mode::Calibrating(wiring) = self.mode {
            let notifier = self.notifier(wiring);
            self.devices.glove.start_streaming(notifier);
        }

        self.emit_connection_status();
        result.map_err(Into::into)
    }

    pub fn connect_hand(&mut self, port: &str) -> Result<(), TranslatorError> {
        let result = self.devices.hand.connect(port);
        if let Err(e) = &result {
            warn!(port, "no se pudo conectar la mano: {}", e);
        }

        if matches!(self.mode, Mode::LiveDrive(_) | Mode::Replay(_)) {
            self.devices.hand.start_accepting();
        }

        self.emit_connection_status();
        result.map_err(Into::into)
    }

    pub fn is_glove_connected(&self) -> bool {
        self.devices.glove.is_connected()
    }

    pub fn is_glove_streaming(&self) -> bool {
        self.devices.glove.is_streaming()
    }

    pub fn is_hand_connected(&self) -> bool {
        self.devices.hand.is_connected()
    }

    // ── Modos ───────────────────────────────────────────────────────────────

    /// Guante → mano. Detiene antes cualquier reproducción o grabación en curso
    pub fn start_live_drive(&mut self) {
        self.stop_replay();
        self.stop_recording();
        self.set_mode(ModeKind::LiveDrive);
    }

    pub fn start_calibration(&mut self) {
        self.set_mode(ModeKind::Calibrating);
    }

    /// Cierra la sesión de calibración y vuelca los rangos observados al perfil.
    ///
    /// Sensores sin muestras conservan su rango. Un rango observado vacío
    /// (min == max) sólo se aplica con `force`.
    pub fn stop_calibration(&mut self, force: bool) {
        if !matches!(self.mode, Mode::Calibrating(_)) {
            debug!("stop_calibration sin calibración activa");
            return;
        }

        let mut applied = 0usize;
        let mut skipped = 0usize;
        for (sensor, range) in self.calibrator.observed_ranges() {
            if sensor >= self.config.sensor_count {
                continue;
            }
            if range.is_degenerate() && !force {
                skipped += 1;
                continue;
            }
            debug!(sensor, min = range.min, max = range.max, "rango calibrado");
            self.user.set_sensor_range(sensor, range);
            applied += 1;
        }
        info!(
            applied,
            skipped,
            samples = self.calibrator.samples_seen(),
            "calibración terminada"
        );

        self.set_mode(ModeKind::Idle);
        self.emit(Notification::CalibrationUpdated);
    }

    /// Archivo → mano. Detiene antes cualquier reproducción o grabación en curso
    pub fn start_replay(&mut self, path: impl AsRef<Path>) -> Result<(), TranslatorError> {
        let path = path.as_ref();
        self.stop_replay();
        self.stop_recording();
        self.set_mode(ModeKind::Idle);

        self.devices.replay.open(path)?;
        if !self.devices.replay.is_well_formed() {
            self.devices.replay.close();
            warn!(path = %path.display(), "archivo de acciones inválido");
            return Err(TranslatorError::MalformedActionFile(path.to_path_buf()));
        }

        self.set_mode(ModeKind::Replay);
        Ok(())
    }

    /// No-op si no hay reproducción
    pub fn stop_replay(&mut self) {
        if matches!(self.mode, Mode::Replay(_)) {
            self.set_mode(ModeKind::Idle);
        } else if self.devices.replay.is_open() {
            self.devices.replay.close();
        }
    }

    /// Graba cada comando de LiveDrive o Replay; convive con el modo activo
    pub fn start_recording(
        &mut self,
        path: impl AsRef<Path>,
        sample_rate_hz: f64,
    ) -> Result<(), TranslatorError> {
        let path = path.as_ref();
        self.stop_recording();

        self.devices
            .recorder
            .open(path, sample_rate_hz, self.config.motor_count)?;
        self.recording = Some(RecordingSession {
            path: path.to_path_buf(),
            sample_rate_hz,
        });
        Ok(())
    }

    /// No-op si no hay grabación
    pub fn stop_recording(&mut self) {
        if let Some(session) = self.recording.take() {
            info!(
                path = %session.path.display(),
                rate_hz = session.sample_rate_hz,
                "grabación detenida"
            );
        }
        if self.devices.recorder.is_open() {
            self.devices.recorder.close();
        }
    }

    /// Vuelve a Idle
    pub fn stop(&mut self) {
        self.set_mode(ModeKind::Idle);
    }

    fn set_mode(&mut self, kind: ModeKind) {
        self.stop_connection();

        let source = match kind {
            ModeKind::Idle => {
                self.emit(Notification::ModeChanged(ModeKind::Idle));
                return;
            }
            ModeKind::Replay => EventSource::Replay,
            ModeKind::LiveDrive | ModeKind::Calibrating => EventSource::Glove,
        };

        let wiring = Wiring {
            epoch: self.next_epoch,
            source,
        };
        self.next_epoch += 1;
        let notifier = self.notifier(wiring);

        self.mode = match kind {
            ModeKind::LiveDrive => {
                if !self.devices.glove.is_connected() {
                    warn!("LiveDrive sin guante conectado");
                }
                self.filter.reset();
                self.devices.hand.start_accepting();
                self.devices.glove.start_streaming(notifier);
                Mode::LiveDrive(wiring)
            }
            ModeKind::Calibrating => {
                if !self.devices.glove.is_connected() {
                    warn!("calibración sin guante conectado");
                }
                self.filter.reset();
                self.calibrator.start_calibrate();
                self.devices.glove.start_streaming(notifier);
                Mode::Calibrating(wiring)
            }
            ModeKind::Replay => {
                self.devices.hand.start_accepting();
                self.devices.replay.start(notifier);
                Mode::Replay(wiring)
            }
            ModeKind::Idle => Mode::Idle,
        };

        info!(mode = ?kind, epoch = wiring.epoch, "modo activo");
        self.emit(Notification::ModeChanged(kind));
    }

    /// Desmonta el cableado del modo actual y deja el traductor en Idle
    fn stop_connection(&mut self) {
        let previous = std::mem::replace(&mut self.mode, Mode::Idle);
        match previous {
            Mode::Idle => return,
            Mode::LiveDrive(_) => {
                self.devices.glove.stop_streaming();
                self.devices.hand.stop_accepting();
            }
            Mode::Calibrating(_) => {
                self.devices.glove.stop_streaming();
                self.calibrator.stop_calibrate();
            }
            Mode::Replay(_) => {
                self.devices.replay.stop();
                self.devices.replay.close();
                self.devices.hand.stop_accepting();
                self.emit(Notification::ReplayEnded);
            }
        }
        debug!(mode = ?previous.kind(), "modo detenido");
    }

    fn notifier(&self, wiring: Wiring) -> Notifier {
        Notifier::new(self.events_tx.clone(), wiring.source, wiring.epoch)
    }

    // ── Eventos ─────────────────────────────────────────────────────────────

    /// Cola de eventos del pipeline, para usar en `select!`
    pub fn events(&self) -> Receiver<PipelineEvent> {
        self.events_rx.clone()
    }

    /// Canal de avisos para el observador
    pub fn notifications(&self) -> Receiver<Notification> {
        self.notify_rx.clone()
    }

    /// Procesa todos los eventos encolados, de a uno. Devuelve los ticks ejecutados
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if self.handle_event(event) {
                handled += 1;
            }
        }
        handled
    }

    /// Ejecuta un tick completo para `event`. Devuelve `false` si el evento
    /// no pertenece al cableado activo.
    pub fn handle_event(&mut self, event: PipelineEvent) -> bool {
        let current = self.mode.wiring();
        if current
            != Some(Wiring {
                epoch: event.epoch,
                source: event.source,
            })
        {
            self.stale_events += 1;
            trace!(?event, "evento de una suscripción anterior");
            return false;
        }

        let outcome = match self.mode.kind() {
            ModeKind::LiveDrive => self.live_drive_tick(),
            ModeKind::Calibrating => self.calibration_tick(),
            ModeKind::Replay => self.replay_tick(),
            ModeKind::Idle => TickOutcome::Continue,
        };
        self.ticks += 1;

        // Las transiciones automáticas ocurren con el tick ya terminado
        match outcome {
            TickOutcome::Continue => {}
            TickOutcome::ReplayFinished => self.stop_replay(),
            TickOutcome::CalibrationComplete => self.stop_calibration(false),
        }
        true
    }

    fn live_drive_tick(&mut self) -> TickOutcome {
        self.read_glove();
        self.emit(Notification::FilteredDataReady);
        self.convert();
        self.dispatch();
        TickOutcome::Continue
    }

    fn calibration_tick(&mut self) -> TickOutcome {
        self.read_glove();
        self.calibrator.write_data(&self.filtered_data);
        self.emit(Notification::CalibrationUpdated);

        match self.config.calibration_auto_stop_samples {
            Some(target) if self.calibrator.is_complete(target) => TickOutcome::CalibrationComplete,
            _ => TickOutcome::Continue,
        }
    }

    fn replay_tick(&mut self) -> TickOutcome {
        match self.devices.replay.next_frame() {
            Some(frame) if frame.len() == self.config.motor_count => {
                let motor_range = self.config.motor_range;
                for (slot, value) in self.converted_data.iter_mut().zip(frame) {
                    *slot = motor_range.clamp(value);
                }
                self.dispatch();
                TickOutcome::Continue
            }
            Some(frame) => {
                warn!(
                    expected = self.config.motor_count,
                    got = frame.len(),
                    "frame con número de motores incorrecto"
                );
                TickOutcome::ReplayFinished
            }
            None => {
                if self.devices.replay.is_well_formed() {
                    info!("fin del archivo de acciones");
                } else {
                    warn!("archivo de acciones inválido, reproducción detenida");
                }
                TickOutcome::ReplayFinished
            }
        }
    }

    /// Copia la muestra del guante y la pasa por el filtro
    fn read_glove(&mut self) {
        let sample = self.devices.glove.current_sample();
        if sample.len() != self.config.sensor_count {
            debug!(
                expected = self.config.sensor_count,
                got = sample.len(),
                "muestra del guante con tamaño inesperado"
            );
        }

        for (slot, value) in self.sensor_data.iter_mut().zip(sample) {
            *slot = value;
        }

        self.filter.correct(&self.sensor_data);
        let state = self.filter.state();
        for (slot, value) in self.filtered_data.iter_mut().zip(state) {
            *slot = value;
        }
    }

    /// Sensor filtrado → motores que acciona, según el perfil del usuario
    fn convert(&mut self) {
        let motor_range = self.config.motor_range;

        for (sensor, motors) in self.user.conformity() {
            let Some(&value) = self.filtered_data.get(sensor) else {
                continue;
            };
            let domain = self.user.sensor_range(sensor);
            // Con dominio vacío `map` devuelve motor_range.min
            let command = motor_range.clamp(range_map::map(
                value,
                domain.min,
                domain.max,
                motor_range.min,
                motor_range.max,
            ));

            for &motor in motors {
                if let Some(slot) = self.converted_data.get_mut(motor) {
                    *slot = command;
                }
            }
        }
    }

    fn dispatch(&mut self) {
        if !self.devices.hand.is_connected() {
            trace!("mano no conectada, comando no enviado");
        }
        self.devices.hand.send(&self.converted_data);

        if self.recording.is_some() {
            self.devices.recorder.write(&self.converted_data);
        }
    }

    fn emit(&self, notification: Notification) {
        match self.notify_tx.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => trace!(?n, "nadie lee los avisos, descartado"),
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn emit_connection_status(&self) {
        self.emit(Notification::ConnectionStatusChanged {
            glove: self.is_glove_connected(),
            hand: self.is_hand_connected(),
        });
    }

    // ── Lectura de estado ───────────────────────────────────────────────────

    pub fn mode(&self) -> ModeKind {
        self.mode.kind()
    }

    pub fn wiring(&self) -> Option<Wiring> {
        self.mode.wiring()
    }

    pub fn is_calibrating(&self) -> bool {
        matches!(self.mode, Mode::Calibrating(_))
    }

    pub fn is_replaying(&self) -> bool {
        matches!(self.mode, Mode::Replay(_))
    }

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Última muestra cruda del guante
    pub fn sensor_data(&self) -> &[i32] {
        &self.sensor_data
    }

    /// Última muestra filtrada
    pub fn filtered_data(&self) -> &[i32] {
        &self.filtered_data
    }

    /// Último comando enviado a la mano
    pub fn converted_data(&self) -> &[i32] {
        &self.converted_data
    }

    /// Mínimos de la calibración en curso; vacío fuera de Calibrating
    pub fn sensors_min(&self) -> Vec<Option<i32>> {
        if self.is_calibrating() {
            self.calibrator.min_calibrated_list()
        } else {
            Vec::new()
        }
    }

    /// Máximos de la calibración en curso; vacío fuera de Calibrating
    pub fn sensors_max(&self) -> Vec<Option<i32>> {
        if self.is_calibrating() {
            self.calibrator.max_calibrated_list()
        } else {
            Vec::new()
        }
    }

    pub fn user(&self) -> &UserProfile {
        &self.user
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn stale_events(&self) -> u64 {
        self.stale_events
    }
}

impl Drop for Translator {
    fn drop(&mut self) {
        self.stop_connection();
        self.stop_recording();
    }
}
