use colored::*;
use terminal_size::{Width, Height, terminal_size};
use crate::environments::EnvironmentRecord;

fn rule() -> String {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    "─".repeat((width.0 as usize).min(64))
}

pub fn print_header(title: &str) {
    let line = rule();
    println!("{}", line.black().bold());

    let name = "sfauth".cyan().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  {} {}  {}", name, version, title);

    println!("{}", line.black().bold());
}

/// Print the authorization URL between rules so it is easy to copy
pub fn print_url(url: &str) {
    let line = rule();
    println!("{}", line.black().bold());
    println!("{}", url.underline());
    println!("{}", line.black().bold());
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("  {} {}", "✗".red().bold(), msg.red());
}

pub fn print_thinking(msg: &str) {
    println!("  {} {}...", "∴".magenta(), msg);
}

/// One registry entry as shown by `list`; tokens are never printed
pub fn print_environment(index: usize, env: &EnvironmentRecord) {
    let not_set = "(not set)".black().bold().to_string();

    println!("{}", format!("#{}", index + 1).bold());
    println!("  alias        : {}", env.alias.cyan());
    println!("  instance_url : {}", env.instance_url);
    println!("  org_id       : {}", env.org_id.clone().unwrap_or_else(|| not_set.clone()));
    println!("  username     : {}", env.username.clone().unwrap_or_else(|| not_set.clone()));
    println!("  connected_at : {}", env.connected_at.to_rfc3339());
    println!("{}", rule().black().bold());
}
