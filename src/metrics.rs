//! Optional observability hooks.
//!
//! With the `metrics` feature, counters and a step-duration histogram are recorded through the
//! global `opentelemetry` meter; installing an exporter is up to the application. With the
//! `tracing` feature, [`tracing_helpers`] provides the spans used around connections,
//! transactions, revision steps and backfills.

#[cfg(feature = "metrics")]
pub use self::otel::{RevchainMetrics, METRICS};

#[cfg(feature = "metrics")]
mod otel {
    use once_cell::sync::Lazy;
    use opentelemetry::{
        global,
        metrics::{Counter, Histogram},
        KeyValue,
    };
    use std::time::Duration;

    pub static METRICS: Lazy<RevchainMetrics> = Lazy::new(RevchainMetrics::init);

    pub struct RevchainMetrics {
        pub steps_total: Counter<u64>,
        pub step_failures_total: Counter<u64>,
        pub step_duration: Histogram<f64>,
        pub backfill_rows_total: Counter<u64>,
        pub rows_read_total: Counter<u64>,
    }

    impl RevchainMetrics {
        pub fn init() -> Self {
            let meter = global::meter("revchain");

            Self {
                steps_total: meter
                    .u64_counter("revchain_steps_total")
                    .with_description("Revision steps committed")
                    .build(),
                step_failures_total: meter
                    .u64_counter("revchain_step_failures_total")
                    .with_description("Revision steps rolled back after an error")
                    .build(),
                step_duration: meter
                    .f64_histogram("revchain_step_duration_seconds")
                    .with_description("Duration of a single revision step")
                    .build(),
                backfill_rows_total: meter
                    .u64_counter("revchain_backfill_rows_total")
                    .with_description("Rows updated by backfills")
                    .build(),
                rows_read_total: meter
                    .u64_counter("revchain_rows_read_total")
                    .with_description("Rows read through the executor")
                    .build(),
            }
        }

        pub fn record_step(&self, partition: &str, direction: &str, elapsed: Duration) {
            let attrs = [
                KeyValue::new("partition", partition.to_string()),
                KeyValue::new("direction", direction.to_string()),
            ];
            self.steps_total.add(1, &attrs);
            self.step_duration.record(elapsed.as_secs_f64(), &attrs);
        }

        pub fn record_step_failure(&self, partition: &str, direction: &str) {
            self.step_failures_total.add(
                1,
                &[
                    KeyValue::new("partition", partition.to_string()),
                    KeyValue::new("direction", direction.to_string()),
                ],
            );
        }

        pub fn record_backfill_rows(&self, table: &str, rows: u64) {
            self.backfill_rows_total
                .add(rows, &[KeyValue::new("table", table.to_string())]);
        }

        pub fn record_rows_read(&self, rows: u64) {
            self.rows_read_total.add(rows, &[]);
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    pub fn acquire_connection_span() -> Span {
        info_span!("revchain.connect")
    }

    pub fn execute_query_span(query: &str) -> Span {
        let statement = query.trim();
        let statement = statement.get(..80).unwrap_or(statement);
        info_span!("revchain.query", statement = %statement)
    }

    pub fn begin_transaction_span() -> Span {
        info_span!("revchain.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        info_span!("revchain.transaction.commit")
    }

    pub fn step_span(revision: &str, direction: &str, partition: &str) -> Span {
        info_span!("revchain.step", revision = %revision, direction = %direction, partition = %partition)
    }

    pub fn backfill_span(table: &str, column: &str) -> Span {
        info_span!("revchain.backfill", table = %table, column = %column)
    }
}
