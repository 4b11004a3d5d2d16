use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use std::path::Path;

const LOG_PATH: &str = "logs/admission.log";

/// Wires up the `log` facade for the binary: colored, human-oriented lines on
/// stderr plus a plain append-only file under `logs/` for later inspection.
///
/// The verbosity comes from `RUST_LOG` and defaults to `info`. Call it once
/// from `main`; if a logger is already installed the call is a no-op apart from
/// a note on stderr.
pub fn init() {
    let level = std::env::var("RUST_LOG").ok().and_then(|raw| raw.parse::<LevelFilter>().ok()).unwrap_or(LevelFilter::Info);

    let mut root = fern::Dispatch::new().level(level).chain(console_sink());

    match file_sink(Path::new(LOG_PATH)) {
        Ok(sink) => root = root.chain(sink),
        Err(error) => eprintln!("File logging to '{}' is disabled: {}", LOG_PATH, error),
    }

    if let Err(error) = root.apply() {
        eprintln!("A logger is already installed, keeping it: {}", error);
        return;
    }

    log::info!("Logging at level {} to stderr and '{}'.", level, LOG_PATH);
}

/// Short timestamps and colored levels for the interactive console.
fn console_sink() -> fern::Dispatch {
    let colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::Green)
        .debug(Color::Blue)
        .trace(Color::BrightBlack);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} {:5} {} > {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stderr())
}

/// Full RFC 3339 timestamps, no colors, one line per record. The parent
/// directory is created on demand; any failure here disables the file sink
/// rather than the whole logger.
fn file_sink(path: &Path) -> std::io::Result<fern::Dispatch> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }

    let sink = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("{} [{}] {}: {}", chrono::Utc::now().to_rfc3339(), record.level(), record.target(), message))
        })
        .chain(fern::log_file(path)?);
    Ok(sink)
}
