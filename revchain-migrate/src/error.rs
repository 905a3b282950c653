//! CLI-level errors

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("no database configured for partition '{0}'; add it under [migrate.binds] or set REVCHAIN__MIGRATE__BINDS__{}", .0.to_uppercase())]
    UnknownPartition(String),

    #[error("error connecting to partition '{partition}': {source}")]
    Connection {
        partition: String,
        #[source]
        source: revchain::ConnectionError,
    },

    #[error("revision file {} already exists", .0.display())]
    RevisionExists(PathBuf),

    #[error("failed to write revision file {}: {source}", .path.display())]
    WriteRevision {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("--from is only meaningful together with --sql")]
    FromWithoutSql,

    #[error("--database-url names a single database and cannot be combined with --all-partitions; configure each partition under [migrate.binds] instead")]
    DatabaseUrlWithAllPartitions,
}
