mod cli;

use clap::Parser;
use crossbeam_channel::bounded;
use std::sync::Arc;

use wiresift::capture::{CaptureBackend, Capturer, PcapBackend};
use wiresift::config;
use wiresift::console::{self, ChannelObserver, Console};
use wiresift::session::Session;
use wiresift::translate::GeminiAssistant;

fn main() {
    let args = cli::Cli::parse();

    // Initialize tracing/logging
    let log_level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {}", err);
            std::process::exit(1);
        }
    };

    let backend: Arc<dyn CaptureBackend> = match &args.read {
        Some(path) => Arc::new(PcapBackend::offline(path)),
        None => Arc::new(PcapBackend::live()),
    };

    // Handle --list-interfaces
    if args.list_interfaces {
        list_interfaces(backend.as_ref());
        return;
    }

    if let Err(e) = run(&args, config, backend) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

/// List available network interfaces and print them.
fn list_interfaces(backend: &dyn CaptureBackend) {
    match backend.list_interfaces() {
        Ok(names) => {
            println!("Available network interfaces:");
            for name in &names {
                println!("  {}", name);
            }
            if names.is_empty() {
                println!("  (no interfaces found; try running with sudo)");
            }
        }
        Err(e) => {
            eprintln!("error listing interfaces: {}", e);
            eprintln!("hint: try running with sudo");
        }
    }
}

fn run(
    args: &cli::Cli,
    config: config::Config,
    backend: Arc<dyn CaptureBackend>,
) -> Result<(), Box<dyn std::error::Error>> {
    let device = match &args.read {
        Some(path) => path.display().to_string(),
        None => config.capture.interface.clone().unwrap_or_default(),
    };
    let autostart = args.read.is_some() || config.capture.interface.is_some();

    let (observer, events) = ChannelObserver::new();
    let capturer = Capturer::new(backend, config.capture.open_options());
    let session = Session::new(capturer, config.filter.clone(), Arc::new(observer));

    if has_api_key(&config.assistant) {
        session.set_translator(GeminiAssistant::translator(config.assistant.clone()));
    }

    // Set up Ctrl-C handler
    let (shutdown_tx, shutdown) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
        eprintln!("\nInterrupt received, stopping capture...");
    })?;

    println!("wiresift v{}", env!("CARGO_PKG_VERSION"));
    println!("Type 'help' for commands.");

    let lines = console::spawn_stdin_reader()?;
    let mut console = Console::new(
        session.clone(),
        config.assistant.clone(),
        device.clone(),
        config.display.max_rows,
        std::io::stdout(),
    );

    if autostart {
        // failures are reported as status lines
        let _ = session.start(&device);
    }

    let result = console.run(events, lines, shutdown);
    session.stop();
    result?;
    Ok(())
}

fn has_api_key(assistant: &config::AssistantConfig) -> bool {
    assistant.api_key.is_some()
        || std::env::var(&assistant.api_key_env).map_or(false, |k| !k.trim().is_empty())
}

fn load_config(args: &cli::Cli) -> Result<config::Config, config::ConfigError> {
    let mut config = match &args.config {
        Some(path) => config::Config::load(path)?,
        None => config::Config::default(),
    };

    let capture = &mut config.capture;
    if let Some(value) = &args.interface {
        capture.interface = Some(value.clone());
    }
    if let Some(value) = args.snaplen {
        capture.snaplen = value;
    }
    if let Some(value) = args.timeout_ms {
        capture.timeout_ms = value;
    }
    if args.promiscuous {
        capture.promiscuous = true;
    }
    if args.no_promiscuous {
        capture.promiscuous = false;
    }

    let filter = &mut config.filter;
    for (slot, value) in [
        (&mut filter.protocol, &args.protocol),
        (&mut filter.src_ip, &args.src_ip),
        (&mut filter.dst_ip, &args.dst_ip),
        (&mut filter.src_port, &args.src_port),
        (&mut filter.dst_port, &args.dst_port),
        (&mut filter.free_text, &args.free_text),
    ] {
        if let Some(value) = value {
            *slot = value.clone();
        }
    }

    if let Some(value) = &args.api_key {
        config.assistant.api_key = Some(value.clone());
    }
    if let Some(value) = &args.model {
        config.assistant.model = value.clone();
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_defaults() {
        let args = cli::Cli::parse_from([
            "wiresift",
            "-i",
            "eth1",
            "--no-promiscuous",
            "--snaplen",
            "512",
            "--protocol",
            "udp",
            "--model",
            "gemini-2.0-flash",
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.capture.interface.as_deref(), Some("eth1"));
        assert!(!config.capture.promiscuous);
        assert_eq!(config.capture.snaplen, 512);
        assert_eq!(config.capture.timeout_ms, 100);
        assert_eq!(config.filter.protocol, "udp");
        assert_eq!(config.assistant.model, "gemini-2.0-flash");
    }

    #[test]
    fn missing_config_file_is_io_error() {
        let args = cli::Cli::parse_from(["wiresift", "--config", "/nonexistent/wiresift.toml"]);
        assert!(matches!(
            load_config(&args),
            Err(config::ConfigError::Io(_))
        ));
    }

    #[test]
    fn read_conflicts_with_interface() {
        assert!(cli::Cli::try_parse_from(["wiresift", "-i", "eth0", "-r", "a.pcap"]).is_err());
    }
}
