use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use guante_mano::action_file::load_action_file;
use guante_mano::types::DEFAULT_SAMPLE_RATE_HZ;

/// Resumen de un archivo de acciones grabado
#[derive(Parser, Debug)]
#[command(name = "inspect_action", version)]
struct Args {
    /// Archivo de acciones (CSV)
    file: PathBuf,

    /// Imprimir todos los frames
    #[arg(long, default_value_t = false)]
    dump: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    println!("🎞️  Inspeccionando {:?}", args.file);

    let action = load_action_file(&args.file)
        .with_context(|| format!("No se pudo leer {:?}", args.file))?;

    let rate = match action.sample_rate_hz {
        Some(rate) => {
            println!("⏲️  Frecuencia: {} Hz", rate);
            rate
        }
        None => {
            println!(
                "ℹ️  Sin cabecera de frecuencia, se reproduce a {} Hz",
                DEFAULT_SAMPLE_RATE_HZ
            );
            DEFAULT_SAMPLE_RATE_HZ
        }
    };

    println!("🤖 Motores: {}", action.channel_count);
    println!(
        "🧱 Frames: {} ({:.2} s)",
        action.frames.len(),
        action.frames.len() as f64 / rate
    );

    if action.frames.is_empty() {
        return Ok(());
    }

    println!("\nPor motor:");
    for motor in 0..action.channel_count {
        let column = action.frames.iter().map(|frame| frame[motor]);
        let min = column.clone().min().unwrap_or_default();
        let max = column.clone().max().unwrap_or_default();
        let mean = column.map(f64::from).sum::<f64>() / action.frames.len() as f64;
        println!(
            "  motor{:<2} min {:>5}  max {:>5}  media {:>8.2}",
            motor, min, max, mean
        );
    }

    if args.dump {
        println!("\n📋 Frames:");
        for (idx, frame) in action.frames.iter().enumerate() {
            println!("  {:05}: {:?}", idx, frame);
        }
    }

    Ok(())
}
