//! REPL – Read-Eval-Print Loop for the FleetDash operator console.
//!
//! Supported slash-commands:
//!   /help                                – show this list
//!   /settings                            – edit `~/.fleetdash/config.toml`
//!   /connect [address]                   – open the broker session
//!   /disconnect                          – close it and clear the fleet view
//!   /status                              – session and worker state
//!   /fleet                               – one line per known vehicle
//!   /agv <serial>                        – full snapshot of one vehicle
//!   /stop <serial>                       – emergencyStop (HARD)
//!   /action <serial> <type> [blocking]   – any instant action
//!   /mission <serial>                    – compose, preview and send an order
//!   /routes [list|search|show|delete|send|save]
//!   /feed [port]                         – start the dashboard feed
//!   /quit | /exit                        – disconnect and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use fleetdash_feed::{DEFAULT_PORT, FleetFeedServer};
use fleetdash_middleware::{CommandDispatcher, ConnectionSupervisor, EMERGENCY_STOP};
use fleetdash_mission::{MissionSummary, ValidationWarning};
use fleetdash_routes::{RouteStore, RouteStoreError, RouteSummary};
use fleetdash_types::fleet::{AgvSnapshot, Waypoint};
use fleetdash_types::protocol::BlockingType;
use fleetdash_types::{FleetError, SessionState};

use crate::config::{self, Config};

// ─────────────────────────────────────────────────────────────────────────────
// Command parsing
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    Settings,
    Connect(Option<String>),
    Disconnect,
    Status,
    Fleet,
    Agv(String),
    Stop(String),
    Action {
        serial: String,
        action_type: String,
        blocking: BlockingType,
    },
    Mission(String),
    Routes(RoutesCommand),
    Feed(Option<u16>),
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoutesCommand {
    List,
    Search(String),
    Show(i64),
    Delete(i64),
    Send { id: i64, serial: String },
    Save { name: String, description: String },
}

impl Command {
    /// Parse one input line.  `Err` carries a usage message.
    pub fn parse(line: &str) -> Result<Command, String> {
        let mut words = line.split_whitespace();
        let head = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();

        let command = match head {
            "/help" => Command::Help,
            "/settings" => Command::Settings,
            "/connect" => Command::Connect(args.first().map(|s| s.to_string())),
            "/disconnect" => Command::Disconnect,
            "/status" => Command::Status,
            "/fleet" => Command::Fleet,
            "/agv" => Command::Agv(required(&args, 0, "/agv <serial>")?),
            "/stop" => Command::Stop(required(&args, 0, "/stop <serial>")?),
            "/action" => {
                const USAGE: &str = "/action <serial> <type> [NONE|SOFT|HARD]";
                let serial = required(&args, 0, USAGE)?;
                let action_type = required(&args, 1, USAGE)?;
                let blocking = match args.get(2) {
                    Some(raw) => raw.parse::<BlockingType>()?,
                    None => BlockingType::Hard,
                };
                Command::Action {
                    serial,
                    action_type,
                    blocking,
                }
            }
            "/mission" => Command::Mission(required(&args, 0, "/mission <serial>")?),
            "/routes" => Command::Routes(RoutesCommand::parse(&args)?),
            "/feed" => match args.first() {
                None => Command::Feed(None),
                Some(raw) => Command::Feed(Some(
                    raw.parse::<u16>()
                        .ok()
                        .filter(|p| *p > 0)
                        .ok_or_else(|| format!("'{raw}' is not a valid port number"))?,
                )),
            },
            "/quit" | "/exit" => Command::Quit,
            other => return Err(format!("Unknown command '{other}'")),
        };
        Ok(command)
    }
}

impl RoutesCommand {
    fn parse(args: &[&str]) -> Result<RoutesCommand, String> {
        let sub = args.first().copied().unwrap_or("list");
        let rest = args.get(1..).unwrap_or_default();
        let command = match sub {
            "list" => RoutesCommand::List,
            "search" => {
                if rest.is_empty() {
                    return Err("usage: /routes search <text>".to_string());
                }
                RoutesCommand::Search(rest.join(" "))
            }
            "show" => RoutesCommand::Show(route_id(rest, "/routes show <id>")?),
            "delete" => RoutesCommand::Delete(route_id(rest, "/routes delete <id>")?),
            "send" => RoutesCommand::Send {
                id: route_id(rest, "/routes send <id> <serial>")?,
                serial: required(rest, 1, "/routes send <id> <serial>")?,
            },
            "save" => RoutesCommand::Save {
                name: required(rest, 0, "/routes save <name> [description]")?,
                description: rest.get(1..).unwrap_or_default().join(" "),
            },
            other => {
                return Err(format!(
                    "Unknown routes action '{other}' (list, search, show, delete, send, save)"
                ));
            }
        };
        Ok(command)
    }
}

fn required(args: &[&str], index: usize, usage: &str) -> Result<String, String> {
    args.get(index)
        .map(|s| s.to_string())
        .ok_or_else(|| format!("usage: {usage}"))
}

fn route_id(args: &[&str], usage: &str) -> Result<i64, String> {
    let raw = required(args, 0, usage)?;
    raw.parse::<i64>()
        .map_err(|_| format!("'{raw}' is not a route id"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Console
// ─────────────────────────────────────────────────────────────────────────────

struct FeedHandle {
    port: u16,
    task: tokio::task::JoinHandle<()>,
}

/// Everything one interactive session needs.
pub struct Console {
    cfg: Config,
    supervisor: Arc<ConnectionSupervisor>,
    dispatcher: CommandDispatcher,
    routes: Option<RouteStore>,
    runtime: tokio::runtime::Runtime,
    feed: Option<FeedHandle>,
    /// Waypoints of the last mission that passed validation, for `/routes save`.
    last_waypoints: Vec<Waypoint>,
    operator: String,
}

impl Console {
    pub fn new(
        cfg: Config,
        supervisor: Arc<ConnectionSupervisor>,
        routes: Option<RouteStore>,
        runtime: tokio::runtime::Runtime,
    ) -> Self {
        let dispatcher = CommandDispatcher::new(Arc::clone(&supervisor))
            .with_max_nodes(cfg.mission.max_nodes_per_mission)
            .with_map_id(cfg.mission.map_id.clone());
        let operator = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "operator".to_string());
        Self {
            cfg,
            supervisor,
            dispatcher,
            routes,
            runtime,
            feed: None,
            last_waypoints: Vec::new(),
            operator,
        }
    }

    /// Run until `/quit`, end of input, or `shutdown` is set.
    pub fn run(&mut self, shutdown: Arc<AtomicBool>) {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            if shutdown.load(Ordering::SeqCst) {
                break;
            }

            print!("{} ", self.prompt());
            stdout.flush().ok();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    eprintln!("{}: {}", "Read error".red(), e);
                    break;
                }
            }

            let input = line.trim();
            if input.is_empty() {
                continue;
            }

            match Command::parse(input) {
                Ok(Command::Quit) => {
                    shutdown.store(true, Ordering::SeqCst);
                    break;
                }
                Ok(command) => self.execute(command),
                Err(message) => println!(
                    "{} {}. Type {} for available commands.",
                    "✗".red(),
                    message,
                    "/help".bold()
                ),
            }
        }

        self.shutdown();
        println!("{}", "Goodbye.".green());
    }

    fn prompt(&self) -> String {
        let marker = match self.supervisor.state() {
            SessionState::Connected => "●".green(),
            SessionState::Connecting => "●".yellow(),
            SessionState::Disconnected => "○".dimmed(),
        };
        format!("{} {}", marker, "fleetdash>".bold().cyan())
    }

    fn execute(&mut self, command: Command) {
        match command {
            Command::Help => cmd_help(),
            Command::Settings => self.cmd_settings(),
            Command::Connect(address) => self.cmd_connect(address),
            Command::Disconnect => self.cmd_disconnect(),
            Command::Status => self.cmd_status(),
            Command::Fleet => self.cmd_fleet(),
            Command::Agv(serial) => self.cmd_agv(&serial),
            Command::Stop(serial) => {
                self.send_action(&serial, EMERGENCY_STOP, BlockingType::Hard)
            }
            Command::Action {
                serial,
                action_type,
                blocking,
            } => self.send_action(&serial, &action_type, blocking),
            Command::Mission(serial) => self.cmd_mission(&serial),
            Command::Routes(sub) => self.cmd_routes(sub),
            Command::Feed(port) => self.cmd_feed(port),
            Command::Quit => {}
        }
    }

    fn shutdown(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.task.abort();
        }
        self.supervisor.disconnect();
    }

    // ── Connectivity ────────────────────────────────────────────────────────

    fn cmd_connect(&self, address: Option<String>) {
        let address = match address {
            Some(address) => address,
            None => {
                let problems = self.cfg.validate();
                if !problems.is_empty() {
                    println!("{}", "Configuration problems:".red());
                    for p in &problems {
                        println!("  • {}", p);
                    }
                    return;
                }
                self.cfg.broker_url()
            }
        };

        print!("  Connecting to {} … ", address.bold());
        io::stdout().flush().ok();
        match self
            .supervisor
            .connect(&address, self.cfg.credentials(), self.cfg.identity())
        {
            Ok(()) if self.supervisor.is_connected() => println!("{}", "connected".green()),
            Ok(()) => {
                println!("{}", "pending".yellow());
                println!("  The session is still starting; check {}.", "/status".bold());
            }
            Err(FleetError::AlreadyConnected) => {
                println!("{}", "already connected".yellow());
                println!("  Run {} first.", "/disconnect".bold());
            }
            Err(e) => println!("{}: {}", "FAILED".red(), e),
        }
    }

    fn cmd_disconnect(&self) {
        let known = self.supervisor.store().len();
        self.supervisor.disconnect();
        println!(
            "{} Disconnected; {} vehicle snapshot(s) cleared.",
            "✓".green(),
            known
        );
    }

    fn cmd_status(&self) {
        let status = self.supervisor.status();
        let state = match status.state {
            SessionState::Connected => status.state.to_string().green(),
            SessionState::Connecting => status.state.to_string().yellow(),
            SessionState::Disconnected => status.state.to_string().red(),
        };

        println!("{}", "Session Status".bold().underline());
        println!("  Broker        : {}", self.cfg.broker_url());
        println!("  Session       : {}", state);
        println!(
            "  Worker        : {}",
            match (status.worker_attached, status.worker_alive) {
                (false, _) => "none".dimmed(),
                (true, true) => "running".green(),
                (true, false) => "stopped".yellow(),
            }
        );
        println!("  Vehicles      : {}", status.fleet_size);
        match &self.feed {
            Some(feed) if !feed.task.is_finished() => {
                println!("  Fleet feed    : http://0.0.0.0:{}", feed.port)
            }
            _ => println!("  Fleet feed    : {}", "off".dimmed()),
        }
    }

    // ── Fleet view ──────────────────────────────────────────────────────────

    fn cmd_fleet(&self) {
        let fleet = self.supervisor.store().all();
        if fleet.is_empty() {
            println!("  {}", "No vehicles reported yet.".dimmed());
            return;
        }
        println!("{}", fleet_header().bold());
        for snapshot in &fleet {
            let row = fleet_row(snapshot);
            if snapshot.is_online() {
                println!("{}", row);
            } else {
                println!("{}", row.dimmed());
            }
        }
        println!("  {} vehicle(s)", fleet.len());
    }

    fn cmd_agv(&self, serial: &str) {
        let Some(snap) = self.supervisor.store().get(serial) else {
            println!("{} '{}'", "Unknown vehicle:".red(), serial.yellow());
            return;
        };
        let age = (chrono::Utc::now() - snap.last_update).num_seconds().max(0);

        println!("{}", format!("Vehicle {}", snap.serial).bold().underline());
        println!("  Manufacturer  : {}", snap.manufacturer);
        println!("  Connection    : {}", snap.connection_status);
        println!("  Mode          : {}", snap.operating_mode);
        println!("  Battery       : {:.1} %", snap.battery_percent);
        println!(
            "  Position      : ({:.2}, {:.2})  heading {:.3} rad",
            snap.position.x, snap.position.y, snap.heading
        );
        println!(
            "  Order         : {}",
            snap.current_order_id.as_deref().unwrap_or("-")
        );
        println!(
            "  Last update   : {} ({}s ago)",
            snap.last_update.format("%Y-%m-%d %H:%M:%S UTC"),
            age
        );
        if snap.errors.is_empty() {
            println!("  Errors        : {}", "none".green());
        } else {
            println!("  Errors        :");
            for err in &snap.errors {
                println!(
                    "    [{}] {}: {}",
                    err.severity.to_string().red(),
                    err.error_type.bold(),
                    err.description
                );
            }
        }
    }

    // ── Commands ────────────────────────────────────────────────────────────

    fn send_action(&self, serial: &str, action_type: &str, blocking: BlockingType) {
        match self.dispatcher.try_send_instant_action(
            serial,
            action_type,
            blocking,
            None,
            self.cfg.dispatch_timeout(),
        ) {
            Ok(sent) => println!(
                "{} {} ({}) sent to {} [headerId {}]",
                "✓".green(),
                action_type.bold(),
                blocking,
                serial.bold(),
                sent.header_id
            ),
            Err(e) => println!("{} {} not sent: {}", "✗".red(), action_type, e),
        }
    }

    fn cmd_mission(&mut self, serial: &str) {
        if !self.supervisor.is_connected() {
            println!("{} Not connected; run {} first.", "✗".red(), "/connect".bold());
            return;
        }
        if !self.supervisor.store().contains(serial) {
            println!("{} '{}'", "Unknown vehicle:".red(), serial.yellow());
            return;
        }

        let generated = fleetdash_mission::generate_order_id(&self.cfg.mission.default_order_prefix);
        let order_id = prompt_str(&format!("  Order ID [{}]: ", generated), &generated);

        println!("  Enter waypoints as {}, one per line.", "nodeId,x,y,theta".bold());
        println!("  Finish with an empty line.");
        let text = read_block();

        let waypoints = match fleetdash_mission::parse_waypoints(&text) {
            Ok(waypoints) => waypoints,
            Err(e) => {
                println!("{} {}", "✗".red(), e);
                return;
            }
        };
        let Some(warnings) = self.check_waypoints(&waypoints) else {
            return;
        };
        self.last_waypoints = waypoints.clone();

        print_preview(&waypoints, &warnings);
        if !confirm(&format!("  Send {} to {}? [y/N]: ", order_id, serial)) {
            println!("  Cancelled. {} keeps these waypoints.", "/routes save <name>".bold());
            return;
        }
        self.send_mission(serial, &order_id, &waypoints);
    }

    fn check_waypoints(&self, waypoints: &[Waypoint]) -> Option<Vec<ValidationWarning>> {
        match fleetdash_mission::validate(waypoints, self.cfg.mission.max_nodes_per_mission) {
            Ok(warnings) => Some(warnings),
            Err(e) => {
                println!("{} {}", "✗".red(), e);
                None
            }
        }
    }

    fn send_mission(&self, serial: &str, order_id: &str, waypoints: &[Waypoint]) {
        match self.dispatcher.dispatch_mission(
            serial,
            order_id,
            waypoints,
            self.cfg.dispatch_timeout(),
        ) {
            Ok(order) => println!(
                "{} {} [headerId {}]",
                "✓".green(),
                MissionSummary::from(&order),
                order.header_id
            ),
            Err(e) => println!("{} Mission not sent: {}", "✗".red(), e),
        }
    }

    // ── Saved routes ────────────────────────────────────────────────────────

    fn cmd_routes(&mut self, command: RoutesCommand) {
        let Some(routes) = self.routes.as_ref() else {
            println!("{} Route storage is unavailable.", "✗".red());
            return;
        };

        match command {
            RoutesCommand::List => print_route_list(routes.list(None)),
            RoutesCommand::Search(query) => print_route_list(routes.search(&query, None)),
            RoutesCommand::Show(id) => match routes.load(id) {
                Ok(route) => {
                    println!("{}", format!("Route {} – {}", route.id, route.name).bold().underline());
                    if !route.description.is_empty() {
                        println!("  {}", route.description);
                    }
                    println!(
                        "  by {} · updated {}",
                        route.created_by,
                        route.updated_at.dimmed()
                    );
                    print_preview(&route.waypoints, &[]);
                }
                Err(e) => println!("{} {}", "✗".red(), e),
            },
            RoutesCommand::Delete(id) => match routes.delete(id, &self.operator) {
                Ok(()) => println!("{} Route {} deleted.", "✓".green(), id),
                Err(e) => println!("{} {}", "✗".red(), e),
            },
            RoutesCommand::Save { name, description } => {
                if self.last_waypoints.is_empty() {
                    println!(
                        "{} Nothing to save; compose a mission with {} first.",
                        "✗".red(),
                        "/mission <serial>".bold()
                    );
                    return;
                }
                match routes.save(&name, &description, &self.last_waypoints, &self.operator) {
                    Ok(id) => println!("{} Saved route {} as #{}.", "✓".green(), name.bold(), id),
                    Err(e) => println!("{} {}", "✗".red(), e),
                }
            }
            RoutesCommand::Send { id, serial } => {
                let route = match routes.load(id) {
                    Ok(route) => route,
                    Err(e) => {
                        println!("{} {}", "✗".red(), e);
                        return;
                    }
                };
                let Some(warnings) = self.check_waypoints(&route.waypoints) else {
                    return;
                };
                for w in &warnings {
                    println!("  {} {}", "⚠".yellow(), w);
                }
                let order_id =
                    fleetdash_mission::generate_order_id(&self.cfg.mission.default_order_prefix);
                self.send_mission(&serial, &order_id, &route.waypoints);
            }
        }
    }

    // ── Dashboard feed ──────────────────────────────────────────────────────

    fn cmd_feed(&mut self, port: Option<u16>) {
        if let Some(feed) = &self.feed
            && !feed.task.is_finished()
        {
            println!("  Fleet feed already serving on port {}.", feed.port.to_string().bold());
            return;
        }

        let server = FleetFeedServer::new(
            Arc::clone(self.supervisor.store()),
            Arc::clone(self.supervisor.bus()),
        )
        .with_port(port.unwrap_or(DEFAULT_PORT));
        let port = server.port();

        let listener = match self.runtime.block_on(server.bind()) {
            Ok(listener) => listener,
            Err(e) => {
                println!("{} {}", "✗".red(), e);
                return;
            }
        };
        let task = self.runtime.spawn(async move {
            if let Err(e) = server.serve(listener).await {
                warn!(error = %e, "fleet feed stopped");
            }
        });
        self.feed = Some(FeedHandle { port, task });
        println!(
            "{} Fleet feed on {} (HTTP) and {} (WebSocket)",
            "✓".green(),
            format!("http://localhost:{port}/fleet").bold(),
            format!("ws://localhost:{port}").bold()
        );
    }

    // ── Settings ────────────────────────────────────────────────────────────

    fn cmd_settings(&mut self) {
        let mut cfg = self.cfg.clone();

        println!("{}", "Settings Editor".bold().underline());
        println!("  Press Enter to keep the current value.");
        cfg.broker.host = prompt_str(&format!("  Broker host    [{}]: ", cfg.broker.host), &cfg.broker.host);
        cfg.broker.port = prompt_u16(&format!("  Broker port    [{}]: ", cfg.broker.port), cfg.broker.port);
        let tls_default = if cfg.broker.use_tls { "yes" } else { "no" };
        let tls = prompt_str(&format!("  Use TLS        [{}]: ", tls_default), tls_default);
        cfg.broker.use_tls = config::parse_flag(&tls).unwrap_or(cfg.broker.use_tls);
        cfg.broker.user = prompt_str(&format!("  Broker user    [{}]: ", cfg.broker.user), &cfg.broker.user);
        let shown = if cfg.broker.password.is_empty() { "<not set>" } else { "<redacted>" };
        let password = prompt_str(&format!("  Password ('-' clears) [{}]: ", shown), "");
        match password.as_str() {
            "" => {}
            "-" => cfg.broker.password = String::new(),
            _ => cfg.broker.password = password,
        }
        cfg.identity.manufacturer = prompt_str(
            &format!("  Manufacturer   [{}]: ", cfg.identity.manufacturer),
            &cfg.identity.manufacturer,
        );
        cfg.identity.serial_number = prompt_str(
            &format!("  Client serial  [{}]: ", cfg.identity.serial_number),
            &cfg.identity.serial_number,
        );

        let problems = cfg.validate();
        if !problems.is_empty() {
            println!("{}", "Not saved:".red());
            for p in &problems {
                println!("  • {}", p);
            }
            return;
        }

        match config::save(&cfg) {
            Ok(()) => {
                println!(
                    "{} {}",
                    "✓ Settings saved to".green(),
                    config::config_path().display().to_string().bold()
                );
                if self.supervisor.state() != SessionState::Disconnected {
                    println!("  Reconnect for broker changes to take effect.");
                }
                self.cfg = cfg;
            }
            Err(e) => println!("{}: {}", "Error saving config".red(), e),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rendering
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "FleetDash Commands".bold().underline());
    let rows = [
        ("/settings", "edit ~/.fleetdash/config.toml"),
        ("/connect [address]", "open the broker session (default from config)"),
        ("/disconnect", "close the session and clear the fleet view"),
        ("/status", "session, worker and feed state"),
        ("/fleet", "list every known vehicle"),
        ("/agv <serial>", "show one vehicle in detail"),
        ("/stop <serial>", "send emergencyStop (HARD)"),
        ("/action <serial> <type> [blocking]", "send an instant action"),
        ("/mission <serial>", "compose and send an order"),
        ("/routes [list|search|show|delete|send|save]", "saved routes"),
        ("/feed [port]", "serve the fleet to dashboards"),
        ("/quit  /exit", "disconnect and exit"),
    ];
    for (cmd, what) in rows {
        println!("  {:<44} – {}", cmd.bold().cyan(), what);
    }
    println!();
}

pub(crate) fn fleet_header() -> String {
    format!(
        "  {:<16} {:<14} {:<17} {:>7}  {:<12} {:>18}  {}",
        "SERIAL", "MANUFACTURER", "CONNECTION", "BATTERY", "MODE", "POSITION", "ORDER"
    )
}

pub(crate) fn fleet_row(snap: &AgvSnapshot) -> String {
    format!(
        "  {:<16} {:<14} {:<17} {:>6.1}%  {:<12} {:>18}  {}",
        snap.serial,
        snap.manufacturer,
        snap.connection_status,
        snap.battery_percent,
        snap.operating_mode,
        format!("({:.2}, {:.2})", snap.position.x, snap.position.y),
        snap.current_order_id.as_deref().unwrap_or("-")
    )
}

fn print_route_list(listed: Result<Vec<RouteSummary>, RouteStoreError>) {
    match listed {
        Ok(summaries) if summaries.is_empty() => println!("  {}", "No saved routes.".dimmed()),
        Ok(summaries) => {
            for r in &summaries {
                println!(
                    "  {:>4}  {:<24} {:<12} {}",
                    r.id.to_string().bold(),
                    r.name,
                    r.created_by.dimmed(),
                    r.description
                );
            }
        }
        Err(e) => println!("{}: {}", "Route storage error".red(), e),
    }
}

fn print_preview(waypoints: &[Waypoint], warnings: &[ValidationWarning]) {
    println!(
        "  {:>3}  {:<16} {:>9} {:>9} {:>8}",
        "#".bold(),
        "NODE".bold(),
        "X".bold(),
        "Y".bold(),
        "THETA".bold()
    );
    for row in fleetdash_mission::preview_rows(waypoints) {
        println!(
            "  {:>3}  {:<16} {:>9} {:>9} {:>8}",
            row.order, row.node_id, row.x, row.y, row.theta
        );
    }
    for w in warnings {
        println!("  {} {}", "⚠".yellow(), w);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Prompt for a u16 value.  Returns `default` when the user presses Enter.
fn prompt_u16(msg: &str, default: u16) -> u16 {
    let raw = prompt_str(msg, &default.to_string());
    match raw.parse::<u16>() {
        Ok(v) => v,
        Err(_) => {
            println!(
                "  {} '{}' is not a valid port number, keeping {}",
                "Warning:".yellow(),
                raw,
                default
            );
            default
        }
    }
}

/// Prompt for a string value.  Returns `default` when the user presses Enter.
pub(crate) fn prompt_str(msg: &str, default: &str) -> String {
    print!("{}", msg);
    io::stdout().flush().ok();

    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() {
                default.to_string()
            } else {
                trimmed
            }
        }
        Err(_) => default.to_string(),
    }
}

fn confirm(msg: &str) -> bool {
    matches!(prompt_str(msg, "n").to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Read lines until an empty one (or end of input).
fn read_block() -> String {
    let stdin = io::stdin();
    let mut block = String::new();
    loop {
        print!("  {} ", "»".dimmed());
        io::stdout().flush().ok();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            Ok(_) if line.trim().is_empty() => break,
            Ok(_) => block.push_str(&line),
        }
    }
    block
}
