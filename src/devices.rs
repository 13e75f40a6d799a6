//! Contratos de los colaboradores externos del traductor: guante, mano,
//! lector de acciones grabadas y grabador. El traductor los recibe ya
//! construidos, así que en tests se sustituyen por dobles.

use std::path::Path;

use crossbeam_channel::{Sender, TrySendError};
use thiserror::Error;
use tracing::trace;

use crate::types::{MotorCommand, SampleVector};

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid action file: {0}")]
    InvalidFile(String),
}

/// Quién disparó un evento del pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    Glove,
    Replay,
}

/// "Hay datos nuevos": cada evento produce exactamente un tick del pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineEvent {
    pub source: EventSource,
    /// Sesión de cableado que suscribió a la fuente
    pub epoch: u64,
}

/// Suscripción de una fuente a la cola del traductor
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Sender<PipelineEvent>,
    event: PipelineEvent,
}

impl Notifier {
    pub fn new(tx: Sender<PipelineEvent>, source: EventSource, epoch: u64) -> Self {
        Self {
            tx,
            event: PipelineEvent { source, epoch },
        }
    }

    /// Encola un evento. Devuelve `false` si la cola está llena o cerrada
    pub fn notify(&self) -> bool {
        match self.tx.try_send(self.event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!(source = ?self.event.source, "cola del pipeline llena, evento descartado");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Guante: entrega un vector de flexión por cada muestra
pub trait GloveSource {
    fn connect(&mut self, port: &str) -> Result<(), DeviceError>;
    fn is_connected(&self) -> bool;
    /// Empieza a leer; cada muestra nueva se anuncia por `notifier`
    fn start_streaming(&mut self, notifier: Notifier);
    fn stop_streaming(&mut self);
    fn is_streaming(&self) -> bool;
    /// Última muestra completa recibida (longitud = número de sensores)
    fn current_sample(&self) -> SampleVector;
}

/// Mano robótica: acepta comandos por motor
pub trait HandSink {
    fn connect(&mut self, port: &str) -> Result<(), DeviceError>;
    fn is_connected(&self) -> bool;
    fn start_accepting(&mut self);
    fn stop_accepting(&mut self);
    /// Fire-and-forget; sin conexión es un no-op
    fn send(&mut self, command: &[i32]);
}

/// Lector secuencial de comandos grabados
pub trait ReplaySource {
    fn open(&mut self, path: &Path) -> Result<(), DeviceError>;
    fn is_open(&self) -> bool;
    fn is_well_formed(&self) -> bool;
    fn is_at_end(&self) -> bool;
    /// Empieza a anunciar frames listos por `notifier`
    fn start(&mut self, notifier: Notifier);
    fn stop(&mut self);
    /// Siguiente frame; `None` al final del archivo o ante una fila inválida
    fn next_frame(&mut self) -> Option<MotorCommand>;
    fn close(&mut self);
}

/// Grabador secuencial de comandos
pub trait RecorderSink {
    fn open(&mut self, path: &Path, sample_rate_hz: f64, channel_count: usize)
        -> Result<(), DeviceError>;
    fn is_open(&self) -> bool;
    fn write(&mut self, command: &[i32]);
    fn close(&mut self);
}

/// Los cuatro colaboradores que consume el traductor
pub struct Devices {
    pub glove: Box<dyn GloveSource>,
    pub hand: Box<dyn HandSink>,
    pub replay: Box<dyn ReplaySource>,
    pub recorder: Box<dyn RecorderSink>,
}
