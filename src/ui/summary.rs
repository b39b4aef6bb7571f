use std::time::Duration;

use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

use crate::orchestrator::role::{Role, BUILD_PORT, CONSOLE_PORT, DEMO_PORT};
use crate::orchestrator::state::{
    CatalogSnapshot, ContainerSnapshot, DaemonStatus, Readiness,
};

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn print_indented(table: &Table) {
    for line in table.to_string().lines() {
        println!("  {}", line);
    }
}

fn dot(state: &str, use_color: bool) -> String {
    if !use_color {
        return format!("\u{25cf} {}", state);
    }
    match state {
        "running" | "up" | "local" => format!("{} {}", "\u{25cf}".green(), state.green()),
        "loading" | "downloading" => format!("{} {}", "\u{25cf}".yellow(), state.yellow()),
        "stopped" | "down" | "error" => format!("{} {}", "\u{25cf}".red(), state.red()),
        other => format!("\u{25cf} {}", other),
    }
}

/// Uptime rounded to whole seconds, e.g. `1h 2m 3s`.
pub fn format_uptime(secs: u64) -> String {
    humantime::format_duration(Duration::from_secs(secs)).to_string()
}

fn url_label(role: Role, port: u16) -> &'static str {
    match (role, port) {
        (Role::Master, CONSOLE_PORT) => "console",
        (Role::Master, BUILD_PORT) => "build",
        (Role::Agent, DEMO_PORT) => "demo",
        _ => "url",
    }
}

pub fn print_status(
    daemon: DaemonStatus,
    readiness: Readiness,
    containers: &[ContainerSnapshot],
    update_available: bool,
) {
    let use_color = std::io::stdout().is_terminal();

    println!();
    println!("  Engine:  {}", dot(&daemon.to_string(), use_color));
    println!("  Console: {}", dot(&readiness.to_string(), use_color));
    println!();

    let mut table = new_table();
    table.set_header(vec![
        Cell::new("Role").set_alignment(CellAlignment::Left),
        Cell::new("Container").set_alignment(CellAlignment::Left),
        Cell::new("Image").set_alignment(CellAlignment::Left),
        Cell::new("URLs").set_alignment(CellAlignment::Left),
        Cell::new("Status").set_alignment(CellAlignment::Center),
    ]);

    for c in containers {
        let urls = if c.urls.is_empty() {
            "-".to_string()
        } else {
            c.urls
                .iter()
                .map(|(port, url)| format!("{}: {}", url_label(c.role, *port), url))
                .collect::<Vec<_>>()
                .join("\n")
        };
        let status = match c.uptime_secs {
            Some(secs) => format!("{} ({})", dot("up", use_color), format_uptime(secs)),
            None => dot("down", use_color),
        };
        table.add_row(vec![
            Cell::new(c.role),
            Cell::new(&c.name),
            Cell::new(c.image.as_deref().unwrap_or("-")),
            Cell::new(&urls),
            Cell::new(&status),
        ]);
    }
    print_indented(&table);

    if update_available {
        println!();
        if use_color {
            println!("  {} newer images are available, see `pekit images`", "!".yellow());
        } else {
            println!("  ! newer images are available, see `pekit images`");
        }
    }
    println!();
}

pub fn print_images(catalogs: &[CatalogSnapshot]) {
    let use_color = std::io::stdout().is_terminal();

    let mut table = new_table();
    table.set_header(vec![
        Cell::new("Role").set_alignment(CellAlignment::Left),
        Cell::new("Image").set_alignment(CellAlignment::Left),
        Cell::new("State").set_alignment(CellAlignment::Center),
    ]);

    for catalog in catalogs {
        for image in &catalog.local {
            table.add_row(vec![
                Cell::new(catalog.role),
                Cell::new(image),
                Cell::new(dot("local", use_color)),
            ]);
        }
        for image in &catalog.downloadable {
            let state = if catalog.downloading.contains(image) {
                "downloading"
            } else {
                "downloadable"
            };
            table.add_row(vec![
                Cell::new(catalog.role),
                Cell::new(image),
                Cell::new(dot(state, use_color)),
            ]);
        }
    }

    println!();
    print_indented(&table);
    println!();
}

/// Printed once `up` has finished its initial setup.
pub fn print_startup_summary(
    containers: &[ContainerSnapshot],
    dashboard_port: Option<u16>,
    warnings: &[String],
) {
    let use_color = std::io::stdout().is_terminal();

    println!();
    if use_color {
        println!("  {}", "pekit".bold());
    } else {
        println!("  pekit");
    }
    for c in containers {
        if use_color {
            println!("    {:<7} {}", c.role.to_string().cyan(), c.terminal_hint.dimmed());
        } else {
            println!("    {:<7} {}", c.role, c.terminal_hint);
        }
    }
    if let Some(port) = dashboard_port {
        println!("    API:    http://127.0.0.1:{}/api/status", port);
    }
    for warning in warnings {
        if use_color {
            println!("  {} {}", "!".yellow(), warning);
        } else {
            println!("  ! {}", warning);
        }
    }

    println!();
    if use_color {
        println!("  Press {} to stop", "Ctrl+C".bold());
    } else {
        println!("  Press Ctrl+C to stop");
    }
    println!();
}
