use std::path::PathBuf;

use flightdeck_jobs::JobError;
use flightdeck_saga::{FlightId, FlightStatus, StoreError, WorkingMapError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read configuration file '{path}'")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration file '{path}'")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("invalid flight input")]
    Input(#[from] WorkingMapError),

    #[error("flight store error")]
    Store(#[from] StoreError),

    #[error("job error")]
    Job(#[from] JobError),

    #[error("flight '{id}' ended with status {status}")]
    FlightUnsuccessful { id: FlightId, status: FlightStatus },
}

pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::CliError;

    #[test]
    fn config_read_error_includes_path() {
        let err = CliError::ConfigRead {
            path: PathBuf::from("/etc/flightdeck.toml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };

        assert!(err.to_string().contains("/etc/flightdeck.toml"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn job_error_converts_via_from() {
        let job_err = flightdeck_jobs::JobError::UnknownFlightType("teardown".to_string());

        let cli_err: CliError = job_err.into();

        assert!(matches!(cli_err, CliError::Job(_)));
        assert!(std::error::Error::source(&cli_err).is_some());
    }

    #[test]
    fn unsuccessful_flight_names_status() {
        let err = CliError::FlightUnsuccessful {
            id: "abc".into(),
            status: flightdeck_saga::FlightStatus::Fatal,
        };

        assert_eq!(err.to_string(), "flight 'abc' ended with status fatal");
    }
}
