//! `fleetdash` – operator console for an AGV fleet
//!
//! 1. Loads `~/.fleetdash/config.toml`, running a short **First-Run Wizard**
//!    when the file is absent.
//! 2. Initialises structured logging (and OTLP export when configured).
//! 3. Drops the user into an **interactive REPL** (`/connect`, `/fleet`,
//!    `/mission`, `/stop`, …).
//! 4. Intercepts **Ctrl-C** to close the broker session and clear the fleet
//!    view before exiting.

mod config;
mod repl;
mod telemetry;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::warn;

use fleetdash_middleware::{ConnectionSupervisor, EventBus, FleetStateStore, MqttClientFactory};
use fleetdash_routes::RouteStore;

fn main() {
    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => run_first_run_wizard(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // ── Structured logging ────────────────────────────────────────────────
    let _telemetry = telemetry::init_tracing("fleetdash", &cfg.logging.level);

    for problem in cfg.validate() {
        warn!(%problem, "configuration problem");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("fleetdash-feed")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    // ── Core services ─────────────────────────────────────────────────────
    let supervisor = Arc::new(
        ConnectionSupervisor::new(
            Arc::new(FleetStateStore::new()),
            Arc::new(EventBus::default()),
            Arc::new(MqttClientFactory::new()),
        )
        .with_connect_grace(cfg.connect_grace()),
    );

    let routes = open_route_store();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let supervisor_for_ctrlc = Arc::clone(&supervisor);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – closing the broker session …".yellow().bold());
        supervisor_for_ctrlc.disconnect();
        println!("{}", "  ✓ Disconnected; fleet view cleared.".green());
        println!("{}", "  ✓ Exiting FleetDash.".green());
        std::process::exit(130);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not disconnect cleanly");
    }

    println!();
    println!("  Broker: {}", cfg.broker_url().bold());
    println!(
        "  Type {} to open the session, {} for all commands.\n",
        "/connect".bold().cyan(),
        "/help".bold().cyan()
    );

    // ── Interactive REPL ──────────────────────────────────────────────────
    let mut console = repl::Console::new(cfg, supervisor, routes, runtime);
    console.run(shutdown);
}

fn open_route_store() -> Option<RouteStore> {
    let path = config::routes_db_path();
    if let Some(parent) = path.parent()
        && let Err(e) = std::fs::create_dir_all(parent)
    {
        warn!(error = %e, path = %parent.display(), "cannot create route storage directory");
        return None;
    }
    match RouteStore::open(&path) {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "saved routes unavailable");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      FleetDash First-Run Wizard      ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's point FleetDash at your broker.\n");

    let mut cfg = config::Config::default();

    cfg.broker.host = repl::prompt_str(
        &format!("  Broker host [{}]: ", cfg.broker.host),
        &cfg.broker.host,
    );

    let port_str = repl::prompt_str(
        &format!("  Broker port [{}]: ", cfg.broker.port),
        &cfg.broker.port.to_string(),
    );
    if let Ok(p) = port_str.trim().parse::<u16>() {
        cfg.broker.port = p;
    }

    let tls = repl::prompt_str("  Use TLS (mqtts)? [no]: ", "no");
    cfg.broker.use_tls = config::parse_flag(&tls).unwrap_or(false);

    cfg.broker.user = repl::prompt_str("  Broker user (empty for anonymous): ", "");
    if !cfg.broker.user.is_empty() {
        cfg.broker.password = repl::prompt_str("  Broker password: ", "");
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }

    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   ________          __  ____             __  "#.bold().cyan());
    println!("{}", r#"  / ____/ /__  ___  / /_/ __ \____ ______/ /_ "#.bold().cyan());
    println!("{}", r#" / /_  / / _ \/ _ \/ __/ / / / __ `/ ___/ __ \"#.bold().cyan());
    println!("{}", r#"/ __/ / /  __/  __/ /_/ /_/ / /_/ (__  ) / / /"#.bold().cyan());
    println!("{}", r#"/_/   /_/\___/\___/\__/_____/\__,_/____/_/ /_/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "FleetDash".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  AGV fleet operator console");
    println!();
}
