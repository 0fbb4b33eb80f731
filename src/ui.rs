use colored::{ColoredString, Colorize};
use netgen::LifecycleState;
use reconcile::{ChangeKind, ConnectionChange};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Lifecycle state, colored by how far along it is
pub fn state(state: LifecycleState) -> ColoredString {
    let text = state.to_string();
    match state {
        LifecycleState::Running => text.green(),
        LifecycleState::ReadyNotRunning | LifecycleState::SettingUp => text.cyan(),
        LifecycleState::Pending => text.dimmed(),
        LifecycleState::Finishing | LifecycleState::Finished => text.yellow(),
        LifecycleState::Aborted => text.red(),
    }
}

/// Print one connection change as `+ source.port -> sink.port`
pub fn change(change: &ConnectionChange) {
    let line = change.to_string();
    match change.kind {
        ChangeKind::Add => println!("  {}", line.green()),
        ChangeKind::Remove => println!("  {}", line.red()),
    }
}
