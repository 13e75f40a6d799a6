//! Archivos de acciones: comandos de motores grabados en CSV.
//!
//! Formato:
//! ```text
//! # sample_rate_hz=50
//! motor0,motor1,motor2,motor3,motor4
//! 0,128,255,64,0
//! ...
//! ```
//! La primera línea es opcional; sin ella se usa la frecuencia por defecto.

use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Sender};
use csv::{ReaderBuilder, StringRecord, Trim};
use tracing::{debug, info, warn};

use crate::devices::{DeviceError, Notifier, RecorderSink, ReplaySource};
use crate::types::{rate_period, MotorCommand, MAX_RATE_HZ, MIN_RATE_HZ};

const RATE_KEY: &str = "sample_rate_hz";

type ActionReader = csv::Reader<Box<dyn Read>>;

/// Abre un archivo de acciones: frecuencia declarada (si la hay), número de
/// canales y lector posicionado en el primer frame.
fn open_action_reader(path: &Path) -> Result<(Option<f64>, usize, ActionReader), DeviceError> {
    let file = File::open(path)?;
    let mut buffered = BufReader::new(file);

    let mut first_line = String::new();
    buffered.read_line(&mut first_line)?;

    let (rate, source): (Option<f64>, Box<dyn Read>) = if first_line.trim_start().starts_with('#') {
        (Some(parse_rate_line(&first_line)?), Box::new(buffered))
    } else {
        // No había cabecera de frecuencia: devolver la línea al lector CSV
        (
            None,
            Box::new(Cursor::new(first_line.into_bytes()).chain(buffered)),
        )
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(source);

    let channel_count = reader.headers()?.len();
    if channel_count == 0 {
        return Err(DeviceError::InvalidFile(format!(
            "{:?} no tiene encabezado de motores",
            path
        )));
    }

    Ok((rate, channel_count, reader))
}

fn parse_rate_line(line: &str) -> Result<f64, DeviceError> {
    let body = line.trim().trim_start_matches('#').trim();
    let (key, value) = body
        .split_once('=')
        .ok_or_else(|| DeviceError::InvalidFile(format!("línea de frecuencia inválida: {}", body)))?;

    if key.trim() != RATE_KEY {
        return Err(DeviceError::InvalidFile(format!("clave desconocida: {}", key.trim())));
    }

    let rate: f64 = value
        .trim()
        .parse()
        .map_err(|_| DeviceError::InvalidFile(format!("frecuencia inválida: {}", value.trim())))?;

    rate_period(rate).ok_or_else(|| out_of_range(rate))?;
    Ok(rate)
}

fn out_of_range(rate: f64) -> DeviceError {
    DeviceError::InvalidFile(format!(
        "frecuencia fuera de rango: {} (admitido {}..={} Hz)",
        rate, MIN_RATE_HZ, MAX_RATE_HZ
    ))
}

fn parse_record(record: &StringRecord, channel_count: usize) -> Option<MotorCommand> {
    if record.len() != channel_count {
        return None;
    }
    record.iter().map(|field| field.parse::<i32>().ok()).collect()
}

/// Contenido completo de un archivo de acciones
#[derive(Debug, Clone, PartialEq)]
pub struct ActionFile {
    pub sample_rate_hz: Option<f64>,
    pub channel_count: usize,
    pub frames: Vec<MotorCommand>,
}

/// Carga un archivo de acciones entero. Cualquier fila inválida es un error
pub fn load_action_file(path: impl AsRef<Path>) -> Result<ActionFile, DeviceError> {
    let path = path.as_ref();
    let (sample_rate_hz, channel_count, mut reader) = open_action_reader(path)?;

    let mut frames = Vec::new();
    let mut record = StringRecord::new();
    while reader.read_record(&mut record)? {
        let frame = parse_record(&record, channel_count).ok_or_else(|| {
            DeviceError::InvalidFile(format!("fila {} inválida en {:?}", frames.len() + 1, path))
        })?;
        frames.push(frame);
    }

    Ok(ActionFile {
        sample_rate_hz,
        channel_count,
        frames,
    })
}

/// Reproductor de archivos de acciones.
///
/// Lee un frame por evento; un hilo temporizador anuncia frames listos a la
/// frecuencia del archivo hasta que se detiene o se agota el archivo.
pub struct CsvReplaySource {
    default_rate_hz: f64,
    rate_hz: f64,
    interval: Duration,
    channel_count: usize,
    path: Option<PathBuf>,
    reader: Option<ActionReader>,
    record: StringRecord,
    well_formed: bool,
    at_end: bool,
    frames_read: usize,
    /// Se activa al llegar al final o a una fila inválida; detiene el temporizador
    exhausted: Arc<AtomicBool>,
    stop_tx: Option<Sender<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl CsvReplaySource {
    pub fn new(default_rate_hz: f64) -> Self {
        Self {
            default_rate_hz,
            rate_hz: default_rate_hz,
            interval: Duration::ZERO,
            channel_count: 0,
            path: None,
            reader: None,
            record: StringRecord::new(),
            well_formed: false,
            at_end: false,
            frames_read: 0,
            exhausted: Arc::new(AtomicBool::new(false)),
            stop_tx: None,
            ticker: None,
        }
    }

    pub fn rate_hz(&self) -> f64 {
        self.rate_hz
    }

    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    pub fn frames_read(&self) -> usize {
        self.frames_read
    }

    fn mark_exhausted(&mut self) {
        self.exhausted.store(true, Ordering::SeqCst);
    }
}

impl ReplaySource for CsvReplaySource {
    fn open(&mut self, path: &Path) -> Result<(), DeviceError> {
        self.close();

        let (rate, channel_count, reader) = open_action_reader(path)?;
        let rate = rate.unwrap_or(self.default_rate_hz);
        self.interval = rate_period(rate).ok_or_else(|| out_of_range(rate))?;
        self.rate_hz = rate;
        self.channel_count = channel_count;
        self.reader = Some(reader);
        self.path = Some(path.to_path_buf());
        self.well_formed = true;
        self.at_end = false;
        self.frames_read = 0;
        self.exhausted = Arc::new(AtomicBool::new(false));

        info!(
            path = %path.display(),
            rate_hz = self.rate_hz,
            channels = channel_count,
            "archivo de acciones abierto"
        );
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    fn is_well_formed(&self) -> bool {
        self.is_open() && self.well_formed
    }

    fn is_at_end(&self) -> bool {
        self.at_end
    }

    fn start(&mut self, notifier: Notifier) {
        self.stop();
        if !self.is_open() {
            warn!("no hay archivo de acciones abierto");
            return;
        }

        let interval = self.interval;
        let exhausted = Arc::clone(&self.exhausted);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        self.stop_tx = Some(stop_tx);
        self.ticker = Some(std::thread::spawn(move || {
            let ticker = tick(interval);
            loop {
                select! {
                    recv(ticker) -> _ => {
                        if exhausted.load(Ordering::SeqCst) {
                            break;
                        }
                        notifier.notify();
                    }
                    recv(stop_rx) -> _ => break,
                }
            }
        }));
        debug!(rate_hz = self.rate_hz, "reproducción iniciada");
    }

    fn stop(&mut self) {
        // Soltar el emisor despierta al temporizador
        self.stop_tx.take();
        if let Some(handle) = self.ticker.take() {
            let _ = handle.join();
        }
    }

    fn next_frame(&mut self) -> Option<MotorCommand> {
        if !self.well_formed || self.at_end {
            return None;
        }
        let reader = self.reader.as_mut()?;

        match reader.read_record(&mut self.record) {
            Ok(true) => match parse_record(&self.record, self.channel_count) {
                Some(frame) => {
                    self.frames_read += 1;
                    Some(frame)
                }
                None => {
                    warn!(row = self.frames_read + 1, "fila inválida en archivo de acciones");
                    self.well_formed = false;
                    self.mark_exhausted();
                    None
                }
            },
            Ok(false) => {
                self.at_end = true;
                self.mark_exhausted();
                None
            }
            Err(e) => {
                warn!("error leyendo archivo de acciones: {}", e);
                self.well_formed = false;
                self.mark_exhausted();
                None
            }
        }
    }

    fn close(&mut self) {
        self.stop();
        if let Some(path) = self.path.take() {
            debug!(path = %path.display(), frames = self.frames_read, "archivo de acciones cerrado");
        }
        self.reader = None;
        self.well_formed = false;
        self.at_end = false;
    }
}

impl Drop for CsvReplaySource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Grabador de comandos a CSV con submuestreo a la frecuencia pedida
pub struct CsvRecorder {
    writer: Option<csv::Writer<File>>,
    channel_count: usize,
    interval: Duration,
    next_due: Option<Instant>,
    written: usize,
}

impl CsvRecorder {
    pub fn new() -> Self {
        Self {
            writer: None,
            channel_count: 0,
            interval: Duration::ZERO,
            next_due: None,
            written: 0,
        }
    }

    /// Frames escritos desde el último `open`
    pub fn written(&self) -> usize {
        self.written
    }

    /// Escribe `command` si toca según la frecuencia de muestreo.
    /// Devuelve `true` si el frame quedó grabado.
    pub fn write_at(&mut self, command: &[i32], now: Instant) -> bool {
        if command.len() != self.channel_count {
            if self.writer.is_some() {
                warn!(
                    expected = self.channel_count,
                    got = command.len(),
                    "comando con ancho distinto al archivo, no se graba"
                );
            }
            return false;
        }
        let Some(writer) = self.writer.as_mut() else {
            return false;
        };

        // Tolerancia de medio periodo para no perder frames por jitter
        let due = match self.next_due {
            None => true,
            Some(due) => now + self.interval / 2 >= due,
        };
        if !due {
            return false;
        }
        self.next_due = Some(match self.next_due {
            Some(prev) if prev + self.interval > now => prev + self.interval,
            _ => now + self.interval,
        });

        let fields: Vec<String> = command.iter().map(|v| v.to_string()).collect();
        match writer.write_record(&fields) {
            Ok(()) => {
                self.written += 1;
                true
            }
            Err(e) => {
                warn!("error grabando frame: {}", e);
                false
            }
        }
    }
}

impl Default for CsvRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl RecorderSink for CsvRecorder {
    fn open(
        &mut self,
        path: &Path,
        sample_rate_hz: f64,
        channel_count: usize,
    ) -> Result<(), DeviceError> {
        self.close();

        let interval = rate_period(sample_rate_hz).ok_or_else(|| out_of_range(sample_rate_hz))?;
        if channel_count == 0 {
            return Err(DeviceError::InvalidFile("sin canales que grabar".into()));
        }

        let mut file = File::create(path)?;
        writeln!(file, "# {}={}", RATE_KEY, sample_rate_hz)?;

        let mut writer = csv::Writer::from_writer(file);
        let header: Vec<String> = (0..channel_count).map(|i| format!("motor{}", i)).collect();
        writer.write_record(&header)?;
        writer.flush()?;

        self.writer = Some(writer);
        self.channel_count = channel_count;
        self.interval = interval;
        self.next_due = None;
        self.written = 0;

        info!(path = %path.display(), sample_rate_hz, channels = channel_count, "grabación iniciada");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    fn write(&mut self, command: &[i32]) {
        self.write_at(command, Instant::now());
    }

    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                warn!("error cerrando la grabación: {}", e);
            }
            info!(frames = self.written, "grabación cerrada");
        }
    }
}

impl Drop for CsvRecorder {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::EventSource;
    use std::fs;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_replay_reads_frames_then_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "accion.csv",
            "# sample_rate_hz=20\nmotor0,motor1\n1,2\n3,4\n5,6\n",
        );

        let mut replay = CsvReplaySource::new(50.0);
        replay.open(&path).unwrap();
        assert!(replay.is_open());
        assert!(replay.is_well_formed());
        assert_eq!(replay.rate_hz(), 20.0);
        assert_eq!(replay.channel_count(), 2);

        assert_eq!(replay.next_frame(), Some(vec![1, 2]));
        assert_eq!(replay.next_frame(), Some(vec![3, 4]));
        assert_eq!(replay.next_frame(), Some(vec![5, 6]));
        assert!(!replay.is_at_end());
        assert_eq!(replay.next_frame(), None);
        assert!(replay.is_at_end());
        assert!(replay.is_well_formed());
    }

    #[test]
    fn test_replay_without_rate_line_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "sin_rate.csv", "motor0\n7\n");

        let mut replay = CsvReplaySource::new(40.0);
        replay.open(&path).unwrap();
        assert_eq!(replay.rate_hz(), 40.0);
        assert_eq!(replay.next_frame(), Some(vec![7]));
    }

    #[test]
    fn test_replay_malformed_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "roto.csv", "motor0,motor1\n1,2\n3,abc\n5,6\n");

        let mut replay = CsvReplaySource::new(50.0);
        replay.open(&path).unwrap();
        assert_eq!(replay.next_frame(), Some(vec![1, 2]));
        assert_eq!(replay.next_frame(), None);
        assert!(!replay.is_well_formed());
        assert_eq!(replay.next_frame(), None);
    }

    #[test]
    fn test_replay_short_row_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "corto.csv", "motor0,motor1\n1\n");

        let mut replay = CsvReplaySource::new(50.0);
        replay.open(&path).unwrap();
        assert_eq!(replay.next_frame(), None);
        assert!(!replay.is_well_formed());
    }

    #[test]
    fn test_replay_rejects_bad_rate_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "rate.csv", "# sample_rate_hz=-3\nmotor0\n1\n");

        let mut replay = CsvReplaySource::new(50.0);
        assert!(matches!(replay.open(&path), Err(DeviceError::InvalidFile(_))));
        assert!(!replay.is_open());
    }

    #[test]
    fn test_replay_rejects_rates_without_period() {
        let dir = tempfile::tempdir().unwrap();
        for (name, rate) in [("lenta.csv", "1e-300"), ("rapida.csv", "1e9"), ("nan.csv", "NaN")] {
            let path = write_file(&dir, name, &format!("# sample_rate_hz={}\nmotor0\n1\n", rate));
            let mut replay = CsvReplaySource::new(50.0);
            assert!(
                matches!(replay.open(&path), Err(DeviceError::InvalidFile(_))),
                "{}",
                rate
            );
            assert!(!replay.is_open());

            let (tx, rx) = bounded(1);
            replay.start(Notifier::new(tx, EventSource::Replay, 1));
            assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
            assert!(load_action_file(&path).is_err());
        }
    }

    #[test]
    fn test_replay_rejects_unusable_default_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "sin_rate.csv", "motor0\n7\n");
        let mut replay = CsvReplaySource::new(1e-300);
        assert!(matches!(replay.open(&path), Err(DeviceError::InvalidFile(_))));
    }

    #[test]
    fn test_replay_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut replay = CsvReplaySource::new(50.0);
        assert!(replay.open(&dir.path().join("nada.csv")).is_err());
        assert!(!replay.is_well_formed());
    }

    #[test]
    fn test_ticker_announces_frames_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "rapido.csv", "# sample_rate_hz=200\nmotor0\n1\n2\n");

        let mut replay = CsvReplaySource::new(50.0);
        replay.open(&path).unwrap();

        let (tx, rx) = bounded(16);
        replay.start(Notifier::new(tx, EventSource::Replay, 3));
        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event.source, EventSource::Replay);
        assert_eq!(event.epoch, 3);

        replay.stop();
        while rx.try_recv().is_ok() {}
        std::thread::sleep(Duration::from_millis(30));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_recorder_roundtrip_with_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grabado.csv");

        let mut recorder = CsvRecorder::new();
        recorder.open(&path, 10.0, 3).unwrap();
        let t0 = Instant::now();
        assert!(recorder.write_at(&[0, 128, 255], t0));
        assert!(recorder.write_at(&[10, 20, 30], t0 + Duration::from_millis(100)));
        recorder.close();

        let loaded = load_action_file(&path).unwrap();
        assert_eq!(loaded.sample_rate_hz, Some(10.0));
        assert_eq!(loaded.channel_count, 3);
        assert_eq!(loaded.frames, vec![vec![0, 128, 255], vec![10, 20, 30]]);
    }

    #[test]
    fn test_recorder_throttles_to_sample_rate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lento.csv");

        let mut recorder = CsvRecorder::new();
        recorder.open(&path, 10.0, 1).unwrap();
        let t0 = Instant::now();

        // Entrada a 50 Hz durante 1 s → ~10 frames
        for i in 0..50u64 {
            recorder.write_at(&[i as i32], t0 + Duration::from_millis(i * 20));
        }
        assert!((9..=11).contains(&recorder.written()), "{}", recorder.written());
    }

    #[test]
    fn test_recorder_rejects_wrong_width_and_closed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ancho.csv");

        let mut recorder = CsvRecorder::new();
        assert!(!recorder.write_at(&[1], Instant::now()));

        recorder.open(&path, 50.0, 2).unwrap();
        assert!(!recorder.write_at(&[1, 2, 3], Instant::now()));
        assert_eq!(recorder.written(), 0);
        assert!(recorder.open(&path, 0.0, 2).is_err());
        assert!(!recorder.is_open());
    }

    #[test]
    fn test_recorder_rejects_rates_without_period() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rate.csv");

        let mut recorder = CsvRecorder::new();
        for rate in [1e-300, 1e9, f64::NAN, f64::INFINITY, -1.0] {
            assert!(
                matches!(recorder.open(&path, rate, 4), Err(DeviceError::InvalidFile(_))),
                "{}",
                rate
            );
            assert!(!recorder.is_open());
        }

        // En el límite inferior el medio periodo de tolerancia no desborda
        recorder.open(&path, MIN_RATE_HZ, 1).unwrap();
        let t0 = Instant::now();
        assert!(recorder.write_at(&[1], t0));
        assert!(!recorder.write_at(&[2], t0 + Duration::from_secs(1)));
        assert!(recorder.write_at(&[3], t0 + Duration::from_secs(100)));
    }

    #[test]
    fn test_load_rejects_bad_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "malo.csv", "motor0\n1\nx\n");
        assert!(matches!(load_action_file(&path), Err(DeviceError::InvalidFile(_))));
    }
}
