use std::io;
use std::process::ExitStatus;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors reading the recognizer output. Any of these ends the message stream.
#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("failed to read recognizer output: {0}")]
    Read(#[from] io::Error),
}

/// A single message could not be decoded. Recoverable: the message is dropped.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("message is not a valid recognition response: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Enumeration of errors delivering a publication to a sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("{url} is not a valid sink url: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("failed to build http client: {0}")]
    ClientError(reqwest::Error),
    #[error("publication could not be delivered: {0}")]
    DeliveryError(reqwest::Error),
    #[error("sink rejected publication with status {0}")]
    Rejected(StatusCode),
    #[error("{0:?} is not a valid mqtt client id")]
    InvalidClientId(String),
    #[error("failed to queue mqtt publication: {0}")]
    MqttError(rumqttc::ClientError),
}

/// Enumeration of errors related to the external recognizer process.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("failed to spawn recognizer {command}: {source}")]
    SpawnError { command: String, source: io::Error },
    #[error("recognizer stdout was not captured")]
    MissingStdout,
    #[error("failed to stop recognizer: {0}")]
    KillError(io::Error),
    #[error("failed to wait for recognizer: {0}")]
    WaitError(io::Error),
    #[error("recognizer exited with {0}")]
    Exited(ExitStatus),
}

/// Enumeration of errors that stop the tracker.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error("message reader task failed: {0}")]
    ReaderTask(#[from] tokio::task::JoinError),
}
