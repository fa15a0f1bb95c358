use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, Timelike, Utc};
use color_eyre::Section;
use color_eyre::eyre::{Result, WrapErr};
use serde_json::json;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{
        FormatEvent, FormatFields, FormattedFields, MakeWriter,
        format::{JsonFields, Writer},
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// Span fields copied to the top level of every JSON line.
const LIFTED_FIELDS: [&str; 3] = ["symbol", "timeframe", "scan"];

/// One JSON object per line, with scan context pulled out of the span stack.
pub struct CustomJsonFormatter;

/// Span fields as recorded by `JsonFields`: a JSON object, or empty.
fn span_fields(formatted: &str) -> serde_json::Map<String, serde_json::Value> {
    serde_json::from_str(formatted).unwrap_or_default()
}

impl<S, N> FormatEvent<S, N> for CustomJsonFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        let mut visitor = JsonVisitor::new();
        event.record(&mut visitor);

        let mut log_entry = json!({
            "timestamp": Local::now().to_rfc3339(),
            "timestamp_utc": Utc::now().to_rfc3339(),
            "level": metadata.level().to_string(),
            "target": metadata.target(),
            "module": metadata.module_path(),
            "file": metadata.file(),
            "line": metadata.line(),
            "fields": visitor.fields
        });

        // innermost span wins
        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                let extensions = span.extensions();
                let Some(fields) = extensions.get::<FormattedFields<N>>() else {
                    continue;
                };
                let fields = span_fields(fields.as_str());
                for name in LIFTED_FIELDS {
                    if let Some(value) = fields.get(name) {
                        log_entry[name] = value.clone();
                    }
                }
            }
        }

        writeln!(writer, "{}", log_entry)
    }
}

struct JsonVisitor {
    fields: serde_json::Map<String, serde_json::Value>,
}

impl JsonVisitor {
    fn new() -> Self {
        Self {
            fields: serde_json::Map::new(),
        }
    }
}

impl tracing::field::Visit for JsonVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        self.fields.insert(field.name().to_string(), json!(format!("{:?}", value)));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }

    fn record_f64(&mut self, field: &tracing::field::Field, value: f64) {
        self.fields.insert(field.name().to_string(), json!(value));
    }
}

/// Hourly log files named after local time: `{prefix}.YYYY-MM-DD-HH.log`.
pub struct LocalTimeFileAppender {
    directory: PathBuf,
    file_name_prefix: String,
    current_file: Option<std::fs::File>,
    current_hour: Option<u32>,
}

impl LocalTimeFileAppender {
    pub fn new<P: AsRef<Path>>(directory: P, file_name_prefix: &str) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory).wrap_err("Failed to create logs directory")?;

        Ok(Self {
            directory,
            file_name_prefix: file_name_prefix.to_string(),
            current_file: None,
            current_hour: None,
        })
    }

    pub fn current_filename(&self) -> String {
        format!("{}.{}.log", self.file_name_prefix, Local::now().format("%Y-%m-%d-%H"))
    }

    fn ensure_current_file(&mut self) -> Result<&mut std::fs::File> {
        let hour = Local::now().hour();

        if self.current_hour != Some(hour) || self.current_file.is_none() {
            let filepath = self.directory.join(self.current_filename());
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&filepath)
                .wrap_err_with(|| format!("Failed to open log file: {:?}", filepath))?;
            self.current_hour = Some(hour);
            return Ok(self.current_file.insert(file));
        }

        self.current_file
            .as_mut()
            .ok_or_else(|| color_eyre::eyre::eyre!("log file not open"))
    }
}

impl io::Write for LocalTimeFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let file = self.ensure_current_file().map_err(io::Error::other)?;
        file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.current_file {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// File layer writing `CustomJsonFormatter` lines. Span fields go through
/// `JsonFields` so other layers' formatting never leaks into them.
pub fn json_layer<S, W>(writer: W) -> tracing_subscriber::fmt::Layer<S, JsonFields, CustomJsonFormatter, W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    tracing_subscriber::fmt::layer()
        .fmt_fields(JsonFields::new())
        .event_format(CustomJsonFormatter)
        .with_ansi(false)
        .with_writer(writer)
}

/// JSON lines into `log_dir/{app}.*.log`, compact lines on stdout. Keep the
/// guard alive for the life of the process or buffered lines are lost.
pub fn init_tracing(log_dir: &str, app: &str) -> Result<WorkerGuard> {
    let file_appender = LocalTimeFileAppender::new(log_dir, app)
        .wrap_err("Failed to create log file appender")
        .with_suggestion(|| format!("Make sure the {} directory is writable", log_dir))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(json_layer(non_blocking))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_ansi(true)
                .compact(),
        )
        .with(
            EnvFilter::from_default_env()
                .add_directive(
                    "signalbot=info"
                        .parse()
                        .wrap_err("Failed to parse log filter directive")?,
                )
                .add_directive(
                    format!("{}=info", app)
                        .parse()
                        .wrap_err("Failed to parse log filter directive")?,
                ),
        )
        .try_init()
        .wrap_err("Failed to install tracing subscriber")?;

    Ok(guard)
}
