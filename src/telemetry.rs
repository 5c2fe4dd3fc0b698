// Copyright Istio Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::env;
use std::fmt::Debug;

use tracing::level_filters::LevelFilter;
use tracing::{Event, Subscriber, field};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields, format};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{Layer, Registry, filter::EnvFilter, prelude::*};

/// Selects the json encoder when set to `json`; anything else logs plain text.
pub const LOG_FORMAT: &str = "LOG_FORMAT";

type BoxLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Installs the global subscriber. The filter is read from `RUST_LOG` and defaults to `info`.
pub fn setup_logging() {
    tracing_subscriber::registry().with(fmt_layer()).init();
}

fn fmt_layer() -> BoxLayer {
    let format = if env::var(LOG_FORMAT).is_ok_and(|f| f == "json") {
        json_fmt()
    } else {
        plain_fmt()
    };
    Box::new(format.with_filter(default_env_filter()))
}

fn json_fmt() -> BoxLayer {
    let format = tracing_subscriber::fmt::format().json().flatten_event(true);
    Box::new(
        tracing_subscriber::fmt::layer()
            .event_format(format)
            .fmt_fields(format::JsonFields::default()),
    )
}

fn plain_fmt() -> BoxLayer {
    Box::new(
        tracing_subscriber::fmt::layer()
            .event_format(PlainFormat)
            .fmt_fields(PlainFormat),
    )
}

fn default_env_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_regex(false)
        .from_env_lossy()
}

/// Tab separated `time level target:span{fields} message k=v` lines.
struct PlainFormat;

struct Visitor<'writer> {
    res: std::fmt::Result,
    is_empty: bool,
    writer: Writer<'writer>,
}

impl Visitor<'_> {
    fn write_padded(&mut self, value: &impl Debug) -> std::fmt::Result {
        let padding = if self.is_empty {
            self.is_empty = false;
            ""
        } else {
            " "
        };
        write!(self.writer, "{padding}{value:?}")
    }
}

impl field::Visit for Visitor<'_> {
    fn record_str(&mut self, field: &field::Field, value: &str) {
        if self.res.is_err() {
            return;
        }
        self.record_debug(field, &value)
    }

    fn record_debug(&mut self, field: &field::Field, val: &dyn Debug) {
        self.res = match field.name() {
            "message" => write!(self.writer, "{val:?}\t"),
            _ => self.write_padded(&format_args!("{}={:?}", field.name(), val)),
        }
    }
}

impl<'writer> FormatFields<'writer> for PlainFormat {
    fn format_fields<R: tracing_subscriber::field::RecordFields>(
        &self,
        writer: Writer<'writer>,
        fields: R,
    ) -> std::fmt::Result {
        let mut visitor = Visitor {
            writer,
            res: Ok(()),
            is_empty: true,
        };
        fields.record(&mut visitor);
        visitor.res
    }
}

impl<S, N> FormatEvent<S, N> for PlainFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        use tracing_subscriber::fmt::time::{FormatTime, SystemTime};

        SystemTime.format_time(&mut writer)?;
        let meta = event.metadata();
        write!(
            writer,
            "\t{}\t",
            meta.level().to_string().to_ascii_lowercase()
        )?;
        let target = meta.target();
        write!(writer, "{}", target.strip_prefix("mesh_ads::").unwrap_or(target))?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, ":{}", span.metadata().name())?;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
            }
        }
        if event.fields().any(|_| true) {
            write!(writer, "\t")?;
        }
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_is_info() {
        if env::var(EnvFilter::DEFAULT_ENV).is_err() {
            assert_eq!(default_env_filter().to_string(), "info");
        }
    }
}
