//! Licence plate sighting tracker.
//!
//! Reads the JSON frames an `alpr` process writes to stdout, collapses the repeated and
//! slightly different readings it produces for the same car, and publishes every distinct
//! sighting once, after it has been observed for a configurable scan window.
//!
//! The data flows recognizer stdout -> [`tokenizer`] -> [`dispatch`] -> [`event::decode`]
//! -> [`engine::DedupEngine`] -> [`publisher::Publisher`] -> [`sink::PublicationSink`].

pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod metrics_consts;
pub mod plate;
pub mod publisher;
pub mod recognizer;
pub mod sink;
pub mod state;
pub mod time;
pub mod tokenizer;
