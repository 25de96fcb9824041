use crate::error::GBError;
use chrono::Local;
use log::{Level, Log, Metadata, Record};

struct GbLogger {
    level: Level,
}

impl Log for GbLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    #[allow(clippy::print_stdout)]
    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            // Workers and the master run on named threads.
            let thread = std::thread::current();
            println!(
                "{} {:<5} [{}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S%.6f"),
                record.level().to_string(),
                thread.name().unwrap_or("-"),
                record.args()
            );
        }
    }

    fn flush(&self) {}
}

pub fn init_logger_with_level(level: Level) -> Result<(), GBError> {
    let logger = GbLogger { level };
    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| GBError::Generic(format!("Could not set logger: {}", e)))?;
    log::set_max_level(level.to_level_filter());
    Ok(())
}
