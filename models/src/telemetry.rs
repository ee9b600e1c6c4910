//! Process-wide initialization of tracing and trace-context propagation.
use opentelemetry_sdk::propagation::TraceContextPropagator;
use serde::Deserialize;
use snafu::ResultExt;
use std::env;
use tracing::Subscriber;
use tracing_subscriber::{fmt, layer::SubscriberExt, registry::LookupSpan, EnvFilter, Layer, Registry};

const DEFAULT_FILTER_DIRECTIVE: &str = "info";

const FILTER_DIRECTIVE_ENV_VAR: &str = "RUST_LOG";
const LOGGING_FORMATTER_ENV_VAR: &str = "LOGGING_FORMATTER";
const LOGGING_ANSI_ENABLED_ENV_VAR: &str = "LOGGING_ANSI_ENABLED";

/// How tracing events are filtered and rendered.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TelemetrySettings {
    filter_directive: String,
    message_format: MessageFormat,
    ansi_enabled: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        TelemetrySettings {
            filter_directive: DEFAULT_FILTER_DIRECTIVE.to_string(),
            message_format: MessageFormat::default(),
            ansi_enabled: false,
        }
    }
}

impl TelemetrySettings {
    pub fn from_env() -> Result<Self> {
        Self::parse(
            env::var(FILTER_DIRECTIVE_ENV_VAR).ok().as_deref(),
            env::var(LOGGING_FORMATTER_ENV_VAR).ok().as_deref(),
            env::var(LOGGING_ANSI_ENABLED_ENV_VAR).ok().as_deref(),
        )
    }

    fn parse(
        filter_directive: Option<&str>,
        message_format: Option<&str>,
        ansi_enabled: Option<&str>,
    ) -> Result<Self> {
        let defaults = Self::default();

        let filter_directive = match filter_directive.map(str::trim) {
            Some(directive) if !directive.is_empty() => {
                // Validate early; the filter itself is rebuilt when the subscriber is assembled.
                EnvFilter::try_new(directive).context(error::FilterDirectiveSnafu { directive })?;
                directive.to_string()
            }
            _ => defaults.filter_directive,
        };

        let message_format = match message_format {
            Some(value) => serde_plain::from_str(value)
                .context(error::LogFormatterEnvSnafu { env_value: value })?,
            None => defaults.message_format,
        };

        let ansi_enabled = match ansi_enabled {
            Some(value) => value
                .to_lowercase()
                .parse()
                .context(error::LogAnsiEnvSnafu { env_value: value })?,
            None => defaults.ansi_enabled,
        };

        Ok(TelemetrySettings {
            filter_directive,
            message_format,
            ansi_enabled,
        })
    }

    fn format_layer<S>(&self) -> Box<dyn Layer<S> + Send + Sync>
    where
        S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    {
        let layer = fmt::layer().with_ansi(self.ansi_enabled);
        match self.message_format {
            MessageFormat::Full => layer.boxed(),
            MessageFormat::Compact => layer.compact().boxed(),
            MessageFormat::Pretty => layer.pretty().boxed(),
            MessageFormat::Json => layer.json().boxed(),
        }
    }

    fn subscriber(&self) -> Result<impl Subscriber + Send + Sync> {
        let filter = EnvFilter::try_new(&self.filter_directive).context(error::FilterDirectiveSnafu {
            directive: self.filter_directive.as_str(),
        })?;
        Ok(Registry::default()
            .with(filter)
            .with(self.format_layer()))
    }
}

/// The message format for logging tracing events.
///
/// See https://docs.rs/tracing-subscriber/latest/tracing_subscriber/fmt/format/index.html
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    #[default]
    Full,
    Compact,
    Pretty,
    /// Newline-delimited JSON.
    Json,
}

/// Installs the global tracing subscriber and the W3C trace-context propagator.
pub fn init_telemetry_from_env() -> Result<()> {
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    let subscriber = TelemetrySettings::from_env()?.subscriber()?;
    tracing::subscriber::set_global_default(subscriber).context(error::TracingConfigurationSnafu)
}

pub mod error {
    use super::{LOGGING_ANSI_ENABLED_ENV_VAR, LOGGING_FORMATTER_ENV_VAR};
    use snafu::Snafu;
    use std::str::ParseBoolError;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum TelemetryConfigError {
        #[snafu(display("Error configuring tracing: '{}'", source))]
        TracingConfiguration {
            source: tracing::subscriber::SetGlobalDefaultError,
        },

        #[snafu(display("Invalid tracing filter directive '{}': '{}'", directive, source))]
        FilterDirective {
            source: tracing_subscriber::filter::ParseError,
            directive: String,
        },

        #[snafu(display(
            "Could not parse formatter from environment variable '{}={}': '{}'",
            LOGGING_FORMATTER_ENV_VAR,
            env_value,
            source
        ))]
        LogFormatterEnv {
            source: serde_plain::Error,
            env_value: String,
        },

        #[snafu(display(
            "Could not parse ANSI enablement from environment variable '{}={}': '{}'",
            LOGGING_ANSI_ENABLED_ENV_VAR,
            env_value,
            source
        ))]
        LogAnsiEnv {
            source: ParseBoolError,
            env_value: String,
        },
    }
}

type Result<T> = std::result::Result<T, TelemetryConfigError>;
pub use error::TelemetryConfigError;
