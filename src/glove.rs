use std::io::{self, BufRead, BufReader, ErrorKind, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info, warn};

use crate::devices::{DeviceError, GloveSource, Notifier};
use crate::types::SampleVector;

const READ_TIMEOUT: Duration = Duration::from_millis(50);
/// Una línea más larga que esto es basura: se descarta sin esperar el '\n'
const MAX_LINE_BYTES: usize = 1024;

/// Guante de flexión conectado por puerto serie.
///
/// El firmware envía una línea ASCII por muestra con un entero por sensor,
/// separados por comas, punto y coma o espacios: `512,498,730,101,644\n`.
pub struct SerialGlove {
    sensor_count: usize,
    baud_rate: u32,
    port_name: Option<String>,
    port: Option<Box<dyn SerialPort>>,
    latest: Arc<Mutex<SampleVector>>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

impl SerialGlove {
    pub fn new(sensor_count: usize, baud_rate: u32) -> Self {
        Self {
            sensor_count,
            baud_rate,
            port_name: None,
            port: None,
            latest: Arc::new(Mutex::new(vec![0; sensor_count])),
            running: Arc::new(AtomicBool::new(false)),
            reader: None,
        }
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }
}

impl GloveSource for SerialGlove {
    fn connect(&mut self, port: &str) -> Result<(), DeviceError> {
        // Reconectar sobrescribe la conexión anterior
        self.stop_streaming();
        self.port = None;
        self.port_name = None;

        let handle = serialport::new(port, self.baud_rate)
            .timeout(READ_TIMEOUT)
            .open()?;
        info!(port, baud = self.baud_rate, "guante conectado");

        self.port = Some(handle);
        self.port_name = Some(port.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn start_streaming(&mut self, notifier: Notifier) {
        self.stop_streaming();

        let Some(port) = self.port.as_ref() else {
            warn!("guante no conectado, no se puede iniciar la lectura");
            return;
        };

        let reader_port = match port.try_clone() {
            Ok(p) => p,
            Err(e) => {
                warn!("no se pudo clonar el puerto del guante: {}", e);
                return;
            }
        };

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let latest = Arc::clone(&self.latest);
        let sensor_count = self.sensor_count;

        self.reader = Some(std::thread::spawn(move || {
            read_loop(reader_port, sensor_count, running, latest, notifier);
        }));
        debug!("lectura del guante iniciada");
    }

    fn stop_streaming(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
            debug!("lectura del guante detenida");
        }
    }

    fn is_streaming(&self) -> bool {
        self.reader.is_some() && self.running.load(Ordering::SeqCst)
    }

    fn current_sample(&self) -> SampleVector {
        match self.latest.lock() {
            Ok(sample) => sample.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Drop for SerialGlove {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineRead {
    /// `pending` termina en '\n'
    Complete,
    /// Faltan bytes; `pending` se conserva para la próxima lectura
    Partial,
    /// Se superó `MAX_LINE_BYTES` sin '\n'; `pending` quedó vacío
    Overflow,
    /// El puerto no entregó nada
    Idle,
}

/// Lee hasta un '\n' sin dejar que `pending` pase de `MAX_LINE_BYTES`
fn read_line_capped<R: BufRead>(reader: &mut R, pending: &mut Vec<u8>) -> io::Result<LineRead> {
    let room = MAX_LINE_BYTES.saturating_sub(pending.len()) as u64;
    let n = reader.by_ref().take(room).read_until(b'\n', pending)?;

    if pending.last() == Some(&b'\n') {
        Ok(LineRead::Complete)
    } else if pending.len() >= MAX_LINE_BYTES {
        pending.clear();
        Ok(LineRead::Overflow)
    } else if n == 0 {
        Ok(LineRead::Idle)
    } else {
        Ok(LineRead::Partial)
    }
}

fn read_loop(
    port: Box<dyn SerialPort>,
    sensor_count: usize,
    running: Arc<AtomicBool>,
    latest: Arc<Mutex<SampleVector>>,
    notifier: Notifier,
) {
    let mut reader = BufReader::new(port);
    // Las líneas parciales sobreviven a los timeouts de lectura
    let mut pending: Vec<u8> = Vec::with_capacity(128);
    let mut lines = 0u64;
    let mut rejected = 0u64;

    while running.load(Ordering::SeqCst) {
        match read_line_capped(&mut reader, &mut pending) {
            Ok(LineRead::Idle) => std::thread::sleep(READ_TIMEOUT),
            Ok(LineRead::Partial) => {}
            Ok(LineRead::Overflow) => {
                rejected += 1;
                debug!(max = MAX_LINE_BYTES, "línea del guante demasiado larga, descartada");
            }
            Ok(LineRead::Complete) => {
                lines += 1;
                let line = String::from_utf8_lossy(&pending);
                match decode_line(&line, sensor_count) {
                    Some(sample) => {
                        match latest.lock() {
                            Ok(mut slot) => *slot = sample,
                            Err(poisoned) => *poisoned.into_inner() = sample,
                        }
                        notifier.notify();
                    }
                    None => {
                        rejected += 1;
                        debug!(line = %line.trim_end(), "línea del guante descartada");
                    }
                }
                pending.clear();
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                warn!("error leyendo el guante: {}", e);
                break;
            }
        }
    }
    info!(lines, rejected, "lectura del guante terminada");
}

/// Decodifica una línea del guante. Devuelve `None` si no trae exactamente
/// `sensor_count` enteros.
pub fn decode_line(line: &str, sensor_count: usize) -> Option<SampleVector> {
    let values: Vec<i32> = line
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|token| !token.is_empty())
        .map(|token| token.parse::<i32>())
        .collect::<Result<_, _>>()
        .ok()?;

    if values.len() != sensor_count {
        return None;
    }

    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_decode_comma_separated() {
        assert_eq!(
            decode_line("512,498,730,101,644\r\n", 5),
            Some(vec![512, 498, 730, 101, 644])
        );
    }

    #[test]
    fn test_decode_mixed_separators() {
        assert_eq!(decode_line(" 1; 2 3,4\n", 4), Some(vec![1, 2, 3, 4]));
        assert_eq!(decode_line("-5 0", 2), Some(vec![-5, 0]));
    }

    #[test]
    fn test_decode_rejects_wrong_count() {
        assert_eq!(decode_line("1,2,3", 5), None);
        assert_eq!(decode_line("", 1), None);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(decode_line("1,2,x,4,5", 5), None);
        assert_eq!(decode_line("1.5,2,3", 3), None);
    }

    #[test]
    fn test_line_without_newline_is_capped() {
        let mut data = vec![b'7'; 3000];
        data.extend_from_slice(b"\n1,2,3\n");
        let mut reader = Cursor::new(data);
        let mut pending = Vec::new();

        let mut overflows = 0;
        loop {
            let read = read_line_capped(&mut reader, &mut pending).unwrap();
            assert!(pending.len() <= MAX_LINE_BYTES);
            match read {
                LineRead::Overflow => overflows += 1,
                LineRead::Complete => break,
                other => panic!("{:?}", other),
            }
        }
        assert_eq!(overflows, 2);
        // Resto de la línea larga: llega completo pero no decodifica
        assert_eq!(decode_line(&String::from_utf8_lossy(&pending), 3), None);
        pending.clear();

        assert_eq!(read_line_capped(&mut reader, &mut pending).unwrap(), LineRead::Complete);
        assert_eq!(decode_line(&String::from_utf8_lossy(&pending), 3), Some(vec![1, 2, 3]));
        pending.clear();
        assert_eq!(read_line_capped(&mut reader, &mut pending).unwrap(), LineRead::Idle);
    }

    #[test]
    fn test_partial_line_survives_between_reads() {
        let mut pending = b"10,2".to_vec();
        let mut reader = Cursor::new(b"0,30\n".to_vec());
        assert_eq!(read_line_capped(&mut reader, &mut pending).unwrap(), LineRead::Complete);
        assert_eq!(decode_line(&String::from_utf8_lossy(&pending), 3), Some(vec![10, 20, 30]));

        let mut pending = Vec::new();
        let mut reader = Cursor::new(b"5,6".to_vec());
        assert_eq!(read_line_capped(&mut reader, &mut pending).unwrap(), LineRead::Partial);
        assert_eq!(pending, b"5,6");
    }

    #[test]
    fn test_unconnected_glove() {
        let mut glove = SerialGlove::new(5, 115_200);
        assert!(!glove.is_connected());
        assert_eq!(glove.current_sample(), vec![0; 5]);

        let (tx, _rx) = crossbeam_channel::bounded(1);
        glove.start_streaming(Notifier::new(tx, crate::devices::EventSource::Glove, 1));
        assert!(!glove.is_streaming());
    }

    #[test]
    fn test_connect_to_missing_port_fails() {
        let mut glove = SerialGlove::new(5, 115_200);
        assert!(glove.connect("/dev/no-such-glove-port").is_err());
        assert!(!glove.is_connected());
    }
}
