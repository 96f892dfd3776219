//! Run the recognizer and publish the plates it sees.
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use envconfig::Envconfig;
use health::HealthRegistry;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common_metrics::{serve, setup_metrics_routes};
use plate_tracker::config::Config;
use plate_tracker::dispatch::Dispatcher;
use plate_tracker::engine::DedupEngine;
use plate_tracker::publisher::Publisher;
use plate_tracker::recognizer::Recognizer;
use plate_tracker::sink::{HttpSink, MqttSink, PrintSink, PublicationSink};
use plate_tracker::time::MonotonicTime;
use plate_tracker::tokenizer::MessageReader;

const DISPATCHER_DEADLINE: Duration = Duration::from_secs(30);

pub async fn index() -> &'static str {
    "plate tracker"
}

async fn shutdown_signal() {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("failed to register SIGTERM handler");

    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())
        .expect("failed to register SIGINT handler");

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    info!("Shutting down gracefully...");
}

fn build_sink(config: &Config) -> Result<Arc<dyn PublicationSink>> {
    if let Some(host) = &config.mqtt.host {
        let sink = MqttSink::new(host, &config.mqtt).context("failed to create MQTT sink")?;
        return Ok(Arc::new(sink));
    }

    match &config.sink.gost_url {
        Some(url) => {
            info!("publishing observations to {}", url);
            let sink = HttpSink::new(url, config.sink.publish_timeout.0)
                .context("failed to create GOST sink")?;
            Ok(Arc::new(sink))
        }
        None => {
            info!("no MQTT_HOST or GOST_URL set, only logging publications");
            Ok(Arc::new(PrintSink {}))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting plate tracker");

    let config = Config::init_from_env().context("failed to load configuration from env")?;

    let liveness = HealthRegistry::new("liveness");
    let dispatcher_liveness = liveness.register("dispatcher", DISPATCHER_DEADLINE);

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route(
            "/_liveness",
            get(move || std::future::ready(liveness.get_status())),
        );
    let router = setup_metrics_routes(router).context("failed to install metrics recorder")?;

    let bind = config.bind();
    let server_handle = tokio::task::spawn(async move {
        if let Err(e) = serve(router, &bind).await {
            error!("failed to serve health and metrics: {}", e);
        }
    });

    let sink = build_sink(&config)?;
    let publisher = Publisher::new(sink.clone(), config.sink.stream_id);
    let engine = DedupEngine::new(config.tracker.settings(), publisher, MonotonicTime {});
    let engine = Arc::new(engine);

    let (recognizer, stdout) =
        Recognizer::spawn(&config.recognizer).context("failed to start recognizer")?;
    let messages = MessageReader::new(stdout)
        .with_buffer_size(config.recognizer.read_buffer_size)
        .into_stream();

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_shutdown.cancel();
    });

    let result = Dispatcher::new(engine)
        .with_max_pending_messages(config.max_pending_messages)
        .with_tick_interval(config.tick_interval.0)
        .with_liveness(dispatcher_liveness)
        .run(messages, shutdown.clone())
        .await;

    // output that ends on its own means the recognizer is exiting
    let stopped = if result.is_ok() && !shutdown.is_cancelled() {
        recognizer.finish().await
    } else {
        recognizer.shutdown().await
    };

    if let Err(e) = sink.close().await {
        warn!("failed to close sink: {}", e);
    }
    server_handle.abort();

    let summary = result.context("plate tracker stopped")?;
    stopped.context("recognizer failed")?;
    info!(
        messages = summary.messages,
        decode_errors = summary.decode_errors,
        published = summary.published,
        "plate tracker stopped"
    );

    Ok(())
}
