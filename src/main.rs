/*
Traductor guante de flexión → mano robótica

1. Lee el guante (puerto serie o simulado) y filtra cada muestra (Kalman)
2. Mapea cada sensor a los motores que acciona según el perfil del usuario
3. Envía el comando a la mano y, opcionalmente, lo graba en CSV
4. Calibra el perfil del usuario o reproduce acciones grabadas

Ejemplos:
     ./target/release/guante-mano drive --glove /dev/ttyUSB0 --hand /dev/ttyACM0
     ./target/release/guante-mano drive --record sesion.csv --rate 25 --seconds 30
     ./target/release/guante-mano calibrate --glove /dev/ttyUSB0 --profile usuario.json
     ./target/release/guante-mano replay sesion.csv --hand /dev/ttyACM0

El puerto `sim` usa el guante sintético / la mano de consola.
Enter termina la sesión. RUST_LOG=debug para más detalle.
*/

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use crossbeam_channel::{after, bounded, never, select, tick, Sender};
use tracing_subscriber::EnvFilter;

use guante_mano::action_file::{CsvRecorder, CsvReplaySource};
use guante_mano::config::Config;
use guante_mano::devices::{Devices, GloveSource, HandSink};
use guante_mano::glove::SerialGlove;
use guante_mano::hand::SerialHand;
use guante_mano::simulated::{ConsoleHand, SimulatedGlove};
use guante_mano::translator::{ModeKind, Notification, Translator};
use guante_mano::types::{rate_period, DEFAULT_SAMPLE_RATE_HZ};
use guante_mano::user::UserProfile;

const SIM_PORT: &str = "sim";
const SIM_NOISE: i32 = 8; // ruido del guante sintético (cuentas ADC)
const DEFAULT_CALIBRATION_SECS: f64 = 10.0;

#[derive(Parser, Debug)]
#[command(
    name = "guante-mano",
    version,
    about = "Guante de flexión → mano robótica: manejo en vivo, calibración, grabación y reproducción"
)]
struct Cli {
    /// Configuración JSON (por defecto: valores incorporados)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Guante → mano en tiempo real
    Drive(DriveArgs),
    /// Registra los extremos de cada sensor y los guarda en el perfil
    Calibrate(CalibrateArgs),
    /// Reproduce un archivo de acciones en la mano
    Replay(ReplayArgs),
}

#[derive(Args, Debug)]
struct RecordArgs {
    /// Grabar los comandos enviados en este CSV
    #[arg(long)]
    record: Option<PathBuf>,

    /// Frecuencia de grabación (Hz)
    #[arg(long, requires = "record")]
    rate: Option<f64>,
}

#[derive(Args, Debug)]
struct DriveArgs {
    #[arg(long, default_value = SIM_PORT)]
    glove: String,

    #[arg(long, default_value = SIM_PORT)]
    hand: String,

    /// Perfil del usuario (JSON); sin él se usa 1:1 sin calibrar
    #[arg(long)]
    profile: Option<PathBuf>,

    #[command(flatten)]
    record: RecordArgs,

    /// Duración máxima en segundos
    #[arg(long)]
    seconds: Option<f64>,
}

#[derive(Args, Debug)]
struct CalibrateArgs {
    #[arg(long, default_value = SIM_PORT)]
    glove: String,

    /// Perfil a actualizar; se crea si no existe
    #[arg(long)]
    profile: PathBuf,

    /// Terminar tras N muestras
    #[arg(long)]
    samples: Option<usize>,

    #[arg(long, default_value_t = DEFAULT_CALIBRATION_SECS)]
    seconds: f64,

    /// Aplicar también rangos vacíos (sensor inmóvil)
    #[arg(long, default_value_t = false)]
    force: bool,
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Archivo de acciones (CSV)
    file: PathBuf,

    #[arg(long, default_value = SIM_PORT)]
    hand: String,

    #[command(flatten)]
    record: RecordArgs,

    #[arg(long)]
    seconds: Option<f64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    println!("🧤 Guante → 🤖 Mano\n");

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("No se pudo cargar la configuración {:?}", path))?,
        None => Config::default(),
    };

    match cli.command {
        Command::Drive(args) => drive(config, args),
        Command::Calibrate(args) => calibrate(config, args),
        Command::Replay(args) => replay(config, args),
    }
}

fn drive(config: Config, args: DriveArgs) -> Result<()> {
    let user = load_user(&config, args.profile.as_deref())?;
    let devices = build_devices(&config, &args.glove, &args.hand);
    let mut translator = Translator::new(config, user, devices)?;

    translator
        .connect_glove(&args.glove)
        .with_context(|| format!("No se pudo conectar el guante en {}", args.glove))?;
    translator
        .connect_hand(&args.hand)
        .with_context(|| format!("No se pudo conectar la mano en {}", args.hand))?;

    println!("🔧 Modo: manejo en vivo");
    translator.start_live_drive();
    start_recording(&mut translator, &args.record)?;

    run(&mut translator, args.seconds)?;

    translator.stop_recording();
    translator.stop();
    println!("\n👋 Saliendo...");
    Ok(())
}

fn calibrate(mut config: Config, args: CalibrateArgs) -> Result<()> {
    if args.samples.is_some() {
        config.calibration_auto_stop_samples = args.samples;
    }
    let sensor_count = config.sensor_count;
    let user = load_user(&config, Some(&args.profile))?;
    let devices = build_devices(&config, &args.glove, SIM_PORT);
    let mut translator = Translator::new(config, user, devices)?;

    translator
        .connect_glove(&args.glove)
        .with_context(|| format!("No se pudo conectar el guante en {}", args.glove))?;

    println!("📏 Calibrando: abre y cierra la mano varias veces");
    translator.start_calibration();
    run(&mut translator, Some(args.seconds))?;

    if translator.is_calibrating() {
        translator.stop_calibration(args.force);
    }

    println!("\n✅ Rangos del perfil:");
    let user = translator.user();
    for sensor in 0..sensor_count {
        let range = user.sensor_range(sensor);
        let mark = if user.is_calibrated(sensor) { "✓" } else { "·" };
        println!("  {} sensor {}: [{:>5}, {:>5}]", mark, sensor, range.min, range.max);
    }

    user.save(&args.profile)
        .with_context(|| format!("No se pudo guardar el perfil {:?}", args.profile))?;
    println!("💾 Perfil guardado en {:?}", args.profile);
    Ok(())
}

fn replay(config: Config, args: ReplayArgs) -> Result<()> {
    let user = config.default_user();
    let devices = build_devices(&config, SIM_PORT, &args.hand);
    let mut translator = Translator::new(config, user, devices)?;

    translator
        .connect_hand(&args.hand)
        .with_context(|| format!("No se pudo conectar la mano en {}", args.hand))?;

    println!("🎞️  Reproduciendo {:?}", args.file);
    translator
        .start_replay(&args.file)
        .with_context(|| format!("No se pudo reproducir {:?}", args.file))?;
    start_recording(&mut translator, &args.record)?;

    run(&mut translator, args.seconds)?;

    translator.stop_recording();
    translator.stop_replay();
    Ok(())
}

fn start_recording(translator: &mut Translator, args: &RecordArgs) -> Result<()> {
    let Some(path) = &args.record else {
        return Ok(());
    };
    let rate = args.rate.unwrap_or(DEFAULT_SAMPLE_RATE_HZ);
    translator
        .start_recording(path, rate)
        .with_context(|| format!("No se pudo grabar en {:?}", path))?;
    println!("⏺️  Grabando en {:?} a {} Hz", path, rate);
    Ok(())
}

fn load_user(config: &Config, profile: Option<&Path>) -> Result<UserProfile> {
    match profile {
        Some(path) if path.exists() => {
            let user = config
                .load_user(path)
                .with_context(|| format!("No se pudo leer el perfil {:?}", path))?;
            println!("👤 Perfil cargado desde {:?}", path);
            Ok(user)
        }
        _ => Ok(config.default_user()),
    }
}

fn build_devices(config: &Config, glove_port: &str, hand_port: &str) -> Devices {
    let glove: Box<dyn GloveSource> = if glove_port == SIM_PORT {
        Box::new(SimulatedGlove::new(
            config.sensor_count,
            DEFAULT_SAMPLE_RATE_HZ,
            config.default_sensor_range,
            SIM_NOISE,
        ))
    } else {
        Box::new(SerialGlove::new(config.sensor_count, config.baud_rate))
    };

    let hand: Box<dyn HandSink> = if hand_port == SIM_PORT {
        Box::new(ConsoleHand::new())
    } else {
        Box::new(SerialHand::new(config.baud_rate))
    };

    Devices {
        glove,
        hand,
        replay: Box::new(CsvReplaySource::new(config.replay_rate_hz)),
        recorder: Box::new(CsvRecorder::new()),
    }
}

/// Hilo que espera Enter en stdin. Si stdin está cerrado no avisa nunca
fn spawn_quit_listener(tx: Sender<()>) {
    std::thread::spawn(move || {
        let mut line = String::new();
        if let Ok(n) = io::stdin().read_line(&mut line) {
            if n > 0 {
                let _ = tx.try_send(());
            }
        }
    });
}

/// Bucle principal: un hilo, un evento a la vez. Termina al volver a Idle,
/// al cumplirse `seconds` o con Enter.
fn run(translator: &mut Translator, seconds: Option<f64>) -> Result<()> {
    let events = translator.events();
    let notifications = translator.notifications();
    let refresh = translator.config().ui_refresh_hz;
    let ui = tick(rate_period(refresh).with_context(|| format!("ui_refresh_hz inválido: {}", refresh))?);
    let deadline = match seconds.and_then(|s| Duration::try_from_secs_f64(s).ok()) {
        Some(limit) if !limit.is_zero() => after(limit),
        _ => never(),
    };
    // `quit_tx` mantiene el canal abierto aunque el hilo de stdin termine
    let (quit_tx, quit) = bounded(1);
    spawn_quit_listener(quit_tx.clone());
    let mut console = Console::default();

    loop {
        select! {
            recv(events) -> event => match event {
                Ok(event) => {
                    translator.handle_event(event);
                }
                Err(_) => break,
            },
            recv(notifications) -> note => {
                if let Ok(note) = note {
                    console.on_notification(note);
                }
            },
            recv(ui) -> _ => console.render(translator)?,
            recv(deadline) -> _ => {
                println!("\n⏱️  Tiempo cumplido");
                break;
            },
            recv(quit) -> _ => break,
        }

        if translator.mode() == ModeKind::Idle {
            break;
        }
    }

    for note in notifications.try_iter() {
        console.on_notification(note);
    }
    Ok(())
}

/// Observador pasivo: imprime el estado a la frecuencia de refresco
#[derive(Debug, Default)]
struct Console {
    dirty: bool,
}

impl Console {
    fn on_notification(&mut self, note: Notification) {
        match note {
            Notification::ConnectionStatusChanged { glove, hand } => {
                println!("🔌 Guante: {} | Mano: {}", status(glove), status(hand));
            }
            Notification::ModeChanged(kind) => println!("\n🔁 Modo: {:?}", kind),
            Notification::FilteredDataReady | Notification::CalibrationUpdated => {
                self.dirty = true
            }
            Notification::ReplayEnded => println!("\n🏁 Reproducción terminada"),
        }
    }

    fn render(&mut self, translator: &Translator) -> Result<()> {
        let line = match translator.mode() {
            ModeKind::LiveDrive if self.dirty => format!(
                "🖐️  {:?} → {:?}",
                translator.filtered_data(),
                translator.converted_data()
            ),
            ModeKind::Calibrating if self.dirty => format!(
                "📏 min {} | max {}",
                format_optional(&translator.sensors_min()),
                format_optional(&translator.sensors_max())
            ),
            ModeKind::Replay => format!("🎞️  {:?}", translator.converted_data()),
            _ => return Ok(()),
        };
        self.dirty = false;

        let mut stdout = io::stdout().lock();
        write!(stdout, "\r{:<96}", line)?;
        stdout.flush()?;
        Ok(())
    }
}

fn status(connected: bool) -> &'static str {
    if connected {
        "✅"
    } else {
        "❌"
    }
}

fn format_optional(values: &[Option<i32>]) -> String {
    let items: Vec<String> = values
        .iter()
        .map(|v| v.map_or_else(|| "-".to_string(), |v| v.to_string()))
        .collect();
    format!("[{}]", items.join(", "))
}
