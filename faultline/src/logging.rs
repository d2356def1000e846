//! Campaign logging: a decorated console drain duplicated with a plain
//! timestamped log file.

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use slog::{Drain, Duplicate, Logger, o};
use slog_term::{FullFormat, PlainSyncDecorator, TermDecorator};

/// Where and how campaign output is rendered. All switches come from the
/// CLI; none of them affect the on-disk protocol.
#[derive(Clone, Debug)]
pub struct LogOptions {
    /// Log to stderr.
    pub console: bool,
    /// Colorize the console drain.
    pub color: bool,
    /// Log file path, `None` to disable the file drain.
    pub file: Option<PathBuf>,
}

impl Default for LogOptions {
    fn default() -> LogOptions {
        LogOptions {
            console: true,
            color: false,
            file: Some(PathBuf::from("log.txt")),
        }
    }
}

fn timestamp(writer: &mut dyn Write) -> io::Result<()> {
    write!(writer, "{}", chrono::Local::now().format("%H:%M:%S"))
}

/// Builds the campaign logger per the options.
pub fn create_logger(options: &LogOptions) -> Result<Logger> {
    let decorator = {
        let builder = TermDecorator::new().stderr();
        if options.color {
            builder.force_color().build()
        } else {
            builder.force_plain().build()
        }
    };
    let console_enabled = options.console;
    let console = FullFormat::new(decorator)
        .use_custom_timestamp(timestamp)
        .build()
        .filter(move |_| console_enabled);

    let file_sink: Box<dyn Write + Send> = match &options.file {
        Some(path) => Box::new(
            File::create(path)
                .with_context(|| format!("could not open log file {}", path.display()))?,
        ),
        None => Box::new(io::sink()),
    };
    let file = FullFormat::new(PlainSyncDecorator::new(file_sink))
        .use_custom_timestamp(timestamp)
        .build();

    let drain = Mutex::new(Duplicate::new(console, file)).ignore_res();
    Ok(Logger::root(drain, o!()))
}
