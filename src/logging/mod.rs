//! Run log: timestamped records on stderr, appended to a log file

use chrono::Local;
use env_logger::{Builder, Env, Target};
use log::LevelFilter;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Format used for the timestamp prefix of every log line
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Log target of progress status lines; always recorded at `info`, even
/// when `RUST_LOG` raises the global level
pub const STATUS_TARGET: &str = "monitor";

/// Writer that copies every record to stderr and, when present, a log file
pub struct TeeWriter<W: Write> {
    console: W,
    file: Option<File>,
}

impl TeeWriter<io::Stderr> {
    /// Open (or create) `log_file` for appending
    pub fn open(log_file: Option<&Path>) -> io::Result<Self> {
        let file = match log_file {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Some(OpenOptions::new().create(true).append(true).open(path)?)
            }
            None => None,
        };
        Ok(Self {
            console: io::stderr(),
            file,
        })
    }
}

impl<W: Write> TeeWriter<W> {
    pub fn with_console(console: W, file: Option<File>) -> Self {
        Self { console, file }
    }
}

impl<W: Write> Write for TeeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // The file gets whole records; a console hiccup must not lose them
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        let _ = self.console.write_all(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        self.console.flush()
    }
}

/// Initialize the global logger.
///
/// The level defaults to `info` and follows `RUST_LOG` when set. Each record
/// is rendered as `[timestamp] LEVEL message`.
pub fn init(log_file: Option<&Path>) -> io::Result<()> {
    let tee = TeeWriter::open(log_file)?;

    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    configure(&mut builder)
        .target(Target::Pipe(Box::new(tee)))
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

fn configure(builder: &mut Builder) -> &mut Builder {
    builder
        .filter(Some(STATUS_TARGET), LevelFilter::Info)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {:<5} {}",
                Local::now().format(TIMESTAMP_FORMAT),
                record.level(),
                record.args()
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{Level, Log, Metadata};
    use tempfile::tempdir;

    fn enabled(logger: &env_logger::Logger, target: &str, level: Level) -> bool {
        logger.enabled(&Metadata::builder().target(target).level(level).build())
    }

    #[test]
    fn test_status_lines_survive_a_quieter_filter() {
        let mut builder = Builder::new();
        builder.parse_filters("warn");
        let logger = configure(&mut builder).build();

        assert!(enabled(&logger, STATUS_TARGET, Level::Info));
        assert!(!enabled(&logger, STATUS_TARGET, Level::Debug));
        assert!(!enabled(&logger, "rustdock_screen::normalize", Level::Info));
        assert!(enabled(&logger, "rustdock_screen::normalize", Level::Warn));
    }

    #[test]
    fn test_tee_appends_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("screen.log");
        std::fs::write(&path, "earlier run\n").unwrap();

        let file = OpenOptions::new().append(true).open(&path).unwrap();
        let mut console = Vec::new();
        {
            let mut tee = TeeWriter::with_console(&mut console, Some(file));
            tee.write_all(b"[2024-01-01 00:00:00] INFO  hello\n").unwrap();
            tee.flush().unwrap();
        }

        assert_eq!(console, b"[2024-01-01 00:00:00] INFO  hello\n");
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "earlier run\n[2024-01-01 00:00:00] INFO  hello\n"
        );
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("logs").join("screen.log");
        let mut tee = TeeWriter::open(Some(&path)).unwrap();
        tee.write_all(b"x\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x\n");
    }
}
