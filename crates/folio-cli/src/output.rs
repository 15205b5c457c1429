//! Plain-text rendering of rows and engine events.

use folio_core::{EngineEvent, ItemInfo};

/// Counts failures seen while an operation ran.
#[derive(Debug, Default)]
pub struct Outcome {
    pub errors: usize,
    pub needs_authentication: Option<String>,
}

impl Outcome {
    pub fn record(&mut self, event: &EngineEvent) {
        match event {
            EngineEvent::Error { .. } => self.errors += 1,
            EngineEvent::NeedsAuthentication { url, .. } => {
                self.needs_authentication = Some(url.clone());
            }
            _ => {}
        }
    }

    pub fn into_result(self) -> anyhow::Result<()> {
        if let Some(url) = self.needs_authentication {
            anyhow::bail!("{url} needs credentials; pass --user and --password");
        }
        match self.errors {
            0 => Ok(()),
            1 => anyhow::bail!("1 operation failed"),
            n => anyhow::bail!("{n} operations failed"),
        }
    }
}

pub fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::Added(item) => println!("+ {}", item.url()),
        EngineEvent::Removed(item) => println!("- {}", item.url()),
        EngineEvent::Changed(item) => println!("~ {}", item.url()),
        EngineEvent::Progress {
            current,
            total,
            percent,
        } => println!("[{percent:>3}%] {current}/{total}"),
        EngineEvent::Error { title, message } => eprintln!("error: {title}: {message}"),
        EngineEvent::ClipboardChanged => {}
        EngineEvent::NeedsAuthentication { user, url } => {
            eprintln!("{url} needs credentials (tried as {user})");
        }
    }
}

pub fn print_rows(rows: &[ItemInfo]) {
    for row in rows {
        let kind = if row.is_symlink() {
            'l'
        } else if row.is_browsable() {
            'd'
        } else {
            '-'
        };
        let size = if row.is_browsable() {
            String::from("-")
        } else {
            human_size(row.size())
        };
        match row.trash_origin() {
            Some(origin) => println!("{kind} {size:>8}  {}  (from {origin})", row.name()),
            None => println!("{kind} {size:>8}  {}", row.name()),
        }
    }
}

/// `1536` -> `"1.5K"`.
fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "K", "M", "G", "T"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}B")
    } else {
        format!("{value:.1}{}", UNITS[unit])
    }
}
