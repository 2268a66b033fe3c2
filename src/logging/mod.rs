use std::{
    fs::{create_dir_all, File, OpenOptions},
    io::{self, LineWriter, Write},
    path::Path,
};

use env_logger::{Builder, Env, Target};

use crate::config;
use crate::config_error;
use crate::core::error::{ErrorContext, RuntimeResult};

/// Line-buffered, append-only log file
pub struct FileWriter {
    inner: LineWriter<File>,
}

impl FileWriter {
    pub fn open(path: &str) -> io::Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().append(true).create(true).open(path)?;
        Ok(Self {
            inner: LineWriter::new(file),
        })
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

pub struct Logger {
    config: config::Log,
}

impl Logger {
    pub fn new(config: config::Log) -> Self {
        Self { config }
    }

    fn target(&self) -> RuntimeResult<Target> {
        match &self.config.path {
            Some(path) => {
                let writer = FileWriter::open(path)
                    .map_err(|e| config_error!("cannot open log file '{}': {}", path, e))?;
                Ok(Target::Pipe(Box::new(writer)))
            }
            None => Ok(Target::Stderr),
        }
    }

    /// Install the global logger. `RUST_LOG` overrides the configured level.
    pub fn init_env_logger(&self) -> RuntimeResult<()> {
        let target = self.target()?;
        Builder::new()
            .filter_level(self.config.level_filter())
            .parse_env(Env::default())
            .target(target)
            .try_init()
            .with_context("logger already initialized")?;
        log::info!("Logging initialized at level {}", self.config.level);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_file_writer_creates_parent() {
        let dir = std::env::temp_dir().join(format!("clickrt-log-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("runtime.log");
        let path = path.to_str().unwrap().to_string();

        let mut writer = FileWriter::open(&path).unwrap();
        writer.write_all(b"first line\n").unwrap();
        writer.flush().unwrap();
        drop(writer);

        let mut writer = FileWriter::open(&path).unwrap();
        writer.write_all(b"second line\n").unwrap();
        writer.flush().unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "first line\nsecond line\n");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_stderr_target_without_path() {
        let logger = Logger::new(config::Log::default());
        assert!(matches!(logger.target(), Ok(Target::Stderr)));
    }
}
