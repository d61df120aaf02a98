//! tcp-reactor: a single-threaded TCP echo server
//!
//! Accepts connections on one listening socket and echoes whatever each
//! client sends. A message containing `close` is echoed and the connection
//! is then closed.
//!
//! Typing `close`, `quit` or `exit` on the console stops the server after
//! the current pass.

use std::io::BufRead;
use std::thread;

use tcp_reactor::config::Config;
use tcp_reactor::protocols::echo::Echo;
use tcp_reactor::runtime::{Reactor, StopHandle};
use tcp_reactor::transport::SocketTransport;
use tracing::{debug, info, Dispatch};
use tracing_subscriber::EnvFilter;

const STOP_WORDS: [&str; 3] = ["close", "quit", "exit"];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    let diagnostics = Dispatch::new(subscriber);

    tracing::dispatcher::with_default(&diagnostics, || serve(config, diagnostics.clone()))
}

fn serve(config: Config, diagnostics: Dispatch) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        address = %config.address,
        port = config.port,
        timeout = config.timeout,
        max_connections = config.max_connections,
        "Starting tcp-reactor"
    );

    let stop = StopHandle::new();
    let mut settings = config.reactor_settings();
    settings.diagnostics = Some(diagnostics.clone());
    settings.stop = stop.clone();

    let transport = SocketTransport::new()?;
    let mut reactor = Reactor::new(transport, Echo, settings)?;
    info!(addr = %reactor.local_addr(), "ready");

    watch_console(stop, diagnostics)?;

    reactor.run()?;
    Ok(())
}

/// Stop the reactor when a console line contains a stop word.
///
/// End of input just ends the watcher, so a detached server keeps running.
fn watch_console(stop: StopHandle, diagnostics: Dispatch) -> std::io::Result<()> {
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            tracing::dispatcher::with_default(&diagnostics, || {
                for line in std::io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    let line = line.to_lowercase();
                    if STOP_WORDS.iter().any(|word| line.contains(word)) {
                        info!("stop requested from console");
                        stop.terminate();
                        break;
                    }
                }
                debug!("console watcher finished");
            });
        })?;
    Ok(())
}
