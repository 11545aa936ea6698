// SPDX-License-Identifier: GPL-3.0-only

//! Installs the process-wide `tracing` subscriber: an ordinary compact
//! formatter on the console, plus a second layer that renders the
//! append-only log file in the exact line shape required downstream (§6):
//!
//! ```text
//! [LEVEL] On <wall-clock timestamp> PT, <message>
//! ```
//!
//! Built as a custom [`tracing_subscriber::fmt::FormatEvent`] rather than
//! a hand-rolled logging framework; everything else (filtering, span
//! context, the subscriber registry) is still the ecosystem crate doing
//! the work.

use std::fmt;
use std::path::Path;

use chrono::Local;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Renders one `tracing::Event` as `[LEVEL] On <timestamp> PT, <message>`.
struct PtFormat;

impl<S, N> FormatEvent<S, N> for PtFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let level = event.metadata().level();
        let timestamp = Local::now().format("%a %d %b at %I:%M:%S%p.%3f");
        write!(writer, "[{level}] On {timestamp} PT, ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs the global subscriber: an `EnvFilter`-gated compact console
/// layer (`RUST_LOG`, defaulting to `info`), plus the PT-formatted
/// append-only file layer at `log_file`.
///
/// A failure to open the log file is not fatal: it's logged as a warning
/// and the console layer is installed regardless.
pub fn init(log_file: &Path) {
    let env_filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact()
        .with_filter(env_filter());

    let registry = tracing_subscriber::registry().with(console_layer);

    match std::fs::OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(file) => {
            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .event_format(PtFormat)
                .with_filter(env_filter());
            registry.with(file_layer).init();
        }
        Err(e) => {
            registry.init();
            tracing::warn!(error = %e, path = %log_file.display(), "Could not open log file; logging to console only");
        }
    }
}
