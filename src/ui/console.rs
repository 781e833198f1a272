//! Line-oriented terminal front end

use anyhow::{Context, Result};
use chrono::Local;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::core::{AppState, OperationKind, Update};

const HELP: &str = "\
Commands:
  list              show tracked apps
  toggle <n>        flip selection of app n
  all | none        select or deselect every app
  preset <key>      select the apps of a preset
  kill | suspend | resume | restore
                    run a batch over the selected apps
  cancel            abort a batch during its countdown
  undo              reverse the last batch (asks first)
  history [clear]   show or forget recent batches
  log               show the log of the last batch
  stats             show CPU and RAM of selected apps
  help              show this text
  quit              save selection and exit";

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Front end state around the engine
struct Console {
    state: AppState,
    /// Set while waiting for the answer to an undo confirmation
    confirm_undo: bool,
}

/// Run the command loop until `quit` or end of input
pub async fn run(state: AppState) -> Result<()> {
    let mut console = Console::new(state);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{}", HELP);
    print_list(&console.state);
    prompt().await;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from stdin")? else {
                    debug!("stdin closed");
                    break;
                };
                if console.handle(line.trim()) == Flow::Quit {
                    break;
                }
                if !console.state.is_busy() {
                    prompt().await;
                }
            }
            Some(update) = console.state.next_update(), if console.state.is_busy() => {
                render(&update);
                if !console.state.is_busy() {
                    prompt().await;
                }
            }
        }
    }

    let mut state = console.state;

    // Let a running operation hand the workspace back before saving
    if state.is_busy() {
        state.cancel();
        while let Some(update) = state.next_update().await {
            render(&update);
        }
    }

    state.save()?;
    println!("Selection saved to {}", state.settings_path().display());
    Ok(())
}

impl Console {
    fn new(state: AppState) -> Self {
        Self {
            state,
            confirm_undo: false,
        }
    }

    fn handle(&mut self, line: &str) -> Flow {
        if std::mem::take(&mut self.confirm_undo) {
            self.answer_undo(line);
            return Flow::Continue;
        }

        let state = &mut self.state;
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            return Flow::Continue;
        };
        let arg = parts.next();

        if state.is_busy() {
            match command {
                "cancel" => {
                    if !state.cancel() {
                        println!("Processing cannot be cancelled");
                    }
                }
                _ => println!("Busy; only 'cancel' is accepted until the operation finishes"),
            }
            return Flow::Continue;
        }

        match command {
            "list" | "ls" => print_list(state),
            "toggle" | "t" => match arg.and_then(|a| a.parse::<usize>().ok()) {
                Some(n) => match state
                    .workspace_mut()
                    .and_then(|ws| ws.registry.toggle(n.wrapping_sub(1)))
                {
                    Some(_) => print_list(state),
                    None => println!("No app {}", n),
                },
                None => println!("Usage: toggle <n>"),
            },
            "all" | "none" => {
                if let Some(ws) = state.workspace_mut() {
                    if command == "all" {
                        ws.registry.select_all();
                    } else {
                        ws.registry.deselect_all();
                    }
                }
                print_list(state);
            }
            "preset" | "p" => match arg {
                Some(key) => match state.apply_preset(key) {
                    Ok(count) => {
                        println!("Preset selected {} apps", count);
                        print_list(state);
                    }
                    Err(e) => println!("{}", e),
                },
                None => print_presets(state),
            },
            "cancel" => println!("Nothing to cancel"),
            "undo" => match state.workspace().and_then(|ws| ws.ledger.peek_last()) {
                Some(record) => {
                    let names: Vec<&str> = record.apps.iter().map(|a| a.name.as_str()).collect();
                    println!(
                        "Undo {} operation on: {}? [y/N]",
                        record.kind,
                        names.join(", ")
                    );
                    self.confirm_undo = true;
                }
                None => println!("Nothing to undo"),
            },
            "history" | "h" => match arg {
                Some("clear") => {
                    if let Some(ws) = state.workspace_mut() {
                        ws.ledger.clear();
                    }
                    println!("History cleared");
                }
                _ => print_history(state),
            },
            "log" => print_log(state),
            "stats" => print_stats(state),
            "help" | "?" => println!("{}", HELP),
            "quit" | "exit" | "q" => return Flow::Quit,
            other => match OperationKind::all()
                .iter()
                .find(|kind| kind.label().eq_ignore_ascii_case(other))
            {
                Some(kind) => start(state, *kind),
                None => println!("Unknown command '{}'; type 'help'", other),
            },
        }
        Flow::Continue
    }

    fn answer_undo(&mut self, answer: &str) {
        if !matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes") {
            println!("Undo skipped");
            return;
        }
        if let Err(e) = self.state.undo() {
            println!("{}", e);
        }
    }
}

fn start(state: &mut AppState, kind: OperationKind) {
    let selected = state
        .workspace()
        .map(|ws| ws.registry.selected_count())
        .unwrap_or(0);
    if selected == 0 {
        println!("No apps selected");
        return;
    }

    match state.start(kind) {
        Ok(()) => println!(
            "{} {} apps in {}s (type 'cancel' to abort)",
            kind,
            selected,
            state.settings().countdown_secs
        ),
        Err(e) => println!("{}", e),
    }
}

fn render(update: &Update) {
    match update {
        Update::CountdownTick(n) => println!("  starting in {}...", n),
        Update::Step { line, progress } => {
            if let Some(line) = line {
                println!("  {:>3.0}%  {}", progress * 100.0, line);
            }
        }
        Update::Finished(summary) => {
            println!("{}", summary.completion_line());
            println!(
                "{} succeeded, {} failed (history #{})",
                summary.succeeded, summary.failed, summary.record_id
            );
        }
        Update::Cancelled => println!("Cancelled"),
        Update::UndoFinished(report) => {
            for line in &report.lines {
                println!("  {}", line);
            }
            println!("{}", report.summary());
        }
        Update::Aborted(reason) => {
            warn!("Operation aborted: {}", reason);
            println!("Operation aborted: {}", reason);
        }
    }
}

fn print_list(state: &AppState) {
    let Some(ws) = state.workspace() else {
        return;
    };
    if ws.registry.is_empty() {
        println!("No apps configured; add them to {}", state.settings_path().display());
        return;
    }

    for (i, entry) in ws.registry.entries().iter().enumerate() {
        let status = state
            .status(i)
            .map(|s| s.label())
            .unwrap_or("unknown");
        println!(
            "{:>3}. [{}] {:<20} {:<32} {:<9} {}",
            i + 1,
            if entry.selected { "x" } else { " " },
            entry.name,
            entry.targets,
            entry.safety().label(),
            status
        );
    }
    println!("{} of {} selected", ws.registry.selected_count(), ws.registry.len());
}

fn print_presets(state: &AppState) {
    let presets = &state.settings().presets;
    if presets.is_empty() {
        println!("No presets configured");
        return;
    }
    for preset in presets {
        println!("  {:<6} {:<16} {}", preset.key, preset.name, preset.apps.join(", "));
    }
}

fn print_history(state: &AppState) {
    let Some(ws) = state.workspace() else {
        return;
    };
    if ws.ledger.is_empty() {
        println!("No history");
        return;
    }

    println!("History ({} of {} kept):", ws.ledger.len(), ws.ledger.max_size());
    for record in ws.ledger.records().rev() {
        println!(
            "  #{:<3} {}  {:<8} {} apps, {} succeeded, {} failed",
            record.id,
            record.timestamp.with_timezone(&Local).format("%H:%M:%S"),
            record.kind,
            record.apps.len(),
            record.succeeded,
            record.failed
        );
    }
}

fn print_log(state: &AppState) {
    if state.last_log().is_empty() {
        println!("No finished batch");
        return;
    }
    for line in state.last_log() {
        println!("  {}", line);
    }
}

fn print_stats(state: &AppState) {
    let Some(ws) = state.workspace() else {
        return;
    };
    for entry in ws.registry.selected() {
        let stats = state.stats(&entry.targets);
        if stats.is_running {
            println!(
                "  {:<20} {:>6.1}% CPU {:>7} MB",
                entry.name, stats.cpu_percent, stats.ram_mb
            );
        } else {
            println!("  {:<20} not running", entry.name);
        }
    }
}

async fn prompt() {
    let mut stdout = tokio::io::stdout();
    let _ = stdout.write_all(b"> ").await;
    let _ = stdout.flush().await;
}
