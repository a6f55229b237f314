mod advertisement;
mod app;
mod config;
mod device_registry;
mod error;
mod radio;
mod scan_service;
mod scan_session;

use app::{Message, ScanConsole};
use config::Config;
use crossbeam_channel::{select, unbounded};
use scan_service::{ScanService, ScanUpdate};
use std::io::BufRead;

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("{}; using default settings", e);
            Config::default()
        }
    };

    // Scan notifications flow from the scan thread to this one
    let (update_sender, updates) = unbounded::<ScanUpdate>();
    let (service, scan_handle) = ScanService::new(update_sender, &config);

    let scan_thread = std::thread::spawn(move || {
        service.run();
    });

    // Stdin is read on its own thread so the main loop can wait on both
    let (line_sender, lines) = unbounded::<String>();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if line_sender.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("Failed to read input: {}", e);
                    break;
                }
            }
        }
    });

    let mut console = ScanConsole::new(scan_handle, config.scan_duration());
    print_lines(&[app_banner()]);
    if config.scan_on_startup {
        print_lines(&console.start());
    }

    while !console.should_quit() {
        let message = select! {
            recv(updates) -> update => update.ok().map(Message::Scan),
            // End of input behaves like quit
            recv(lines) -> line => Some(match line {
                Ok(line) => Message::parse(&line).unwrap_or_else(|e| {
                    println!("{}", e);
                    Message::Help
                }),
                Err(_) => Message::Quit,
            }),
        };
        match message {
            Some(message) => print_lines(&console.update(message)),
            None => {
                log::info!("Scan service ended");
                break;
            }
        }
    }

    if scan_thread.join().is_err() {
        log::error!("Scan thread panicked");
    }
}

fn app_banner() -> String {
    format!(
        "ble-scout {}: nearby Bluetooth LE devices. Type 'h' for help.",
        env!("CARGO_PKG_VERSION")
    )
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{}", line);
    }
}
