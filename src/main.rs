use netpulse::config::Config;
use netpulse::error::CAPTURE_HINT;
use netpulse::pipeline::{self, GraphWorker};
use netpulse::sniff::{self, PcapSource};
use netpulse::{dashboard, logging, NetPulseError, Session};
use std::net::TcpListener;
use std::process::ExitCode;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::load();
    logging::init(&config.log_level);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "netpulse stopped");
            if err.is_capture_unavailable() {
                eprintln!("Error starting packet capture: {}", err);
                eprintln!("{}", CAPTURE_HINT);
            }
            ExitCode::from(err.exit_code())
        }
    }
}

async fn run(config: Config) -> Result<(), NetPulseError> {
    config.validate()?;

    // capture must be live before anything that serves data exists
    let source = PcapSource::open(&config.capture())?;

    let (session, writer) = Session::new(config.subscriber_buffer, config.send_timeout());
    let shutdown = session.shutdown.clone();
    ctrlc::set_handler(move || shutdown.trigger())?;

    let (producer, consumer) = pipeline::channel(config.queue_capacity, session.pipeline.clone());

    let worker = GraphWorker::new(writer, session.hub.clone());
    let writer_thread = pipeline::spawn_writer(consumer, worker, session.shutdown.clone())?;
    let capture_thread = sniff::start_sniffing(source, producer, session.shutdown.clone())?;

    let listener = TcpListener::bind(config.bind)?;
    let served = dashboard::serve(listener, session.clone()).await;

    info!("shutting down");
    session.teardown();
    join_within(vec![capture_thread, writer_thread], config.shutdown_grace()).await;

    served
}

/// Waits for the worker threads, but never longer than `grace`.
async fn join_within(threads: Vec<JoinHandle<()>>, grace: Duration) {
    let deadline = Instant::now() + grace;
    for handle in threads {
        let name = handle.thread().name().unwrap_or("worker").to_string();
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(thread = %name, "did not stop within the grace period, abandoning");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if handle.join().is_err() {
            error!(thread = %name, "thread panicked");
        }
    }
}
