use std::fmt;

use chrono::{DateTime, Utc};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter};

/// Relayer state transitions, rendered as the bracketed tag of each log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Scan,
    Listen,
    Tx,
    Ok,
    Err,
    Skip,
    Wait,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "INIT",
            Phase::Scan => "SCAN",
            Phase::Listen => "LISTEN",
            Phase::Tx => "TX",
            Phase::Ok => "OK",
            Phase::Err => "ERR",
            Phase::Skip => "SKIP",
            Phase::Wait => "WAIT",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Default)]
struct FieldExtractor {
    phase: Option<String>,
    message: String,
    fields: Vec<(&'static str, String)>,
}

impl Visit for FieldExtractor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record(field, format!("{:?}", value));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record(field, value.to_string());
    }
}

impl FieldExtractor {
    fn record(&mut self, field: &Field, value: String) {
        match field.name() {
            "message" => self.message = value,
            "phase" => self.phase = Some(value.trim_matches('"').to_string()),
            name => self.fields.push((name, value)),
        }
    }
}

/// Line-oriented `[timestamp] [PHASE ] message k=v` output.
pub struct PhaseFormatter;

impl<S, N> FormatEvent<S, N> for PhaseFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(&self, _ctx: &FmtContext<'_, S, N>, mut writer: Writer<'_>, event: &Event<'_>) -> fmt::Result {
        let mut visitor = FieldExtractor::default();
        event.record(&mut visitor);

        let tag = visitor.phase.unwrap_or_else(|| level_tag(event.metadata().level()).to_string());
        write_line(&mut writer, Utc::now(), &tag, &visitor.message, &visitor.fields)
    }
}

fn level_tag(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERR",
        Level::WARN => "WARN",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

fn write_line(
    writer: &mut Writer<'_>,
    timestamp: DateTime<Utc>,
    tag: &str,
    message: &str,
    fields: &[(&'static str, String)],
) -> fmt::Result {
    write!(writer, "[{}] [{:<6}] {}", timestamp.format("%Y-%m-%d %H:%M:%S"), tag, message)?;
    for (name, value) in fields {
        write!(writer, " {}={}", name, value)?;
    }
    writeln!(writer)
}

/// Installs the global subscriber. `directives` uses `EnvFilter` syntax.
pub fn init(directives: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(directives)?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_fmt::layer().event_format(PhaseFormatter))
        .try_init()?;
    Ok(())
}
