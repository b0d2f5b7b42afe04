//! Process context
//!
//! Each tool builds one `Context` at startup. It installs the tool's log
//! subscriber as the default for the current thread and removes it again
//! when dropped. Bridge threads pick up the same subscriber when spawned.

use std::fmt;

use qtools_types::unique_id;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// How much a tool logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Warnings and errors
    Quiet,
    /// Notices, warnings and errors
    #[default]
    Normal,
    /// Everything, including debug lines
    Verbose,
}

impl Verbosity {
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        match (quiet, verbose) {
            (_, true) => Self::Verbose,
            (true, false) => Self::Quiet,
            (false, false) => Self::Normal,
        }
    }

    fn directive(self) -> &'static str {
        match self {
            Self::Quiet => "warn",
            Self::Normal => "info",
            Self::Verbose => "debug",
        }
    }
}

/// Logging and identity for one tool invocation
pub struct Context {
    name: String,
    _guard: tracing::subscriber::DefaultGuard,
}

impl Context {
    /// Install the log subscriber for `name`. `RUST_LOG` wins over
    /// `verbosity` when set.
    pub fn init(name: impl Into<String>, verbosity: Verbosity) -> Self {
        let name = name.into();

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

        let subscriber = tracing_subscriber::registry().with(filter).with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .event_format(ToolFormat { name: name.clone() }),
        );

        let guard = tracing::subscriber::set_default(subscriber);

        Self {
            name,
            _guard: guard,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured container id, or `<tool>-<4 hex chars>`
    pub fn container_id(&self, configured: Option<&str>) -> String {
        match configured {
            Some(id) => id.to_string(),
            None => format!("{}-{}", self.name, unique_id(2)),
        }
    }
}

/// `<tool>: <tag> <message>`
struct ToolFormat {
    name: String,
}

impl<S, N> FormatEvent<S, N> for ToolFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let tag = match *event.metadata().level() {
            Level::ERROR => "Error!",
            Level::WARN => "Warning!",
            Level::INFO => "notice:",
            _ => "debug:",
        };

        write!(writer, "{}: {} ", self.name, tag)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_flags() {
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
        assert_eq!(Verbosity::from_flags(true, false), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Verbose);
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Verbose);
    }

    #[test]
    fn test_container_id() {
        let cx = Context::init("qsend", Verbosity::Quiet);

        assert_eq!(cx.container_id(Some("fixed")), "fixed");

        let generated = cx.container_id(None);
        assert!(generated.starts_with("qsend-"));
        assert_eq!(generated.len(), "qsend-".len() + 4);
    }
}
