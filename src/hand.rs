use std::io::Write;
use std::time::Duration;

use serialport::SerialPort;
use tracing::{debug, info, warn};

use crate::devices::{DeviceError, HandSink};

/// Mano robótica conectada por puerto serie.
///
/// Cada comando viaja como una línea ASCII con un entero por motor:
/// `0,128,255,64,0\n`. Los errores de escritura se registran y se descartan.
pub struct SerialHand {
    baud_rate: u32,
    port_name: Option<String>,
    port: Option<Box<dyn SerialPort>>,
    accepting: bool,
    sent: u64,
}

impl SerialHand {
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            port_name: None,
            port: None,
            accepting: false,
            sent: 0,
        }
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// Comandos escritos con éxito desde la conexión
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl HandSink for SerialHand {
    fn connect(&mut self, port: &str) -> Result<(), DeviceError> {
        self.port = None;
        self.port_name = None;

        let handle = serialport::new(port, self.baud_rate)
            .timeout(Duration::from_millis(100))
            .open()?;
        info!(port, baud = self.baud_rate, "mano conectada");

        self.port = Some(handle);
        self.port_name = Some(port.to_string());
        self.sent = 0;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn start_accepting(&mut self) {
        self.accepting = true;
    }

    fn stop_accepting(&mut self) {
        self.accepting = false;
    }

    fn send(&mut self, command: &[i32]) {
        if !self.accepting {
            debug!("mano en pausa, comando descartado");
            return;
        }
        let Some(port) = self.port.as_mut() else {
            debug!("mano no conectada, comando descartado");
            return;
        };

        let frame = encode_command(command);
        match port.write_all(frame.as_bytes()) {
            Ok(()) => self.sent += 1,
            Err(e) => warn!("error enviando comando a la mano: {}", e),
        }
    }
}

/// Serializa un comando de motores al formato de línea de la mano
pub fn encode_command(command: &[i32]) -> String {
    let mut line = command
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_command() {
        assert_eq!(encode_command(&[0, 128, 255, 64]), "0,128,255,64\n");
        assert_eq!(encode_command(&[]), "\n");
    }

    #[test]
    fn test_send_without_port_is_noop() {
        let mut hand = SerialHand::new(115_200);
        hand.start_accepting();
        hand.send(&[1, 2, 3]);
        assert_eq!(hand.sent(), 0);
        assert!(!hand.is_connected());
    }

    #[test]
    fn test_connect_to_missing_port_fails() {
        let mut hand = SerialHand::new(115_200);
        assert!(hand.connect("/dev/no-such-hand-port").is_err());
        assert!(hand.port_name().is_none());
    }
}
