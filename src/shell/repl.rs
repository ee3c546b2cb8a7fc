//! Interactive REPL (Read-Eval-Print Loop) for txscope.

use std::io::{self, BufRead, Write};

use super::session::Session;
use super::ShellResult;
use crate::transaction::Propagation;

/// REPL configuration.
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// Prompt string.
    pub prompt: String,
    /// Print the physical events caused by each statement.
    pub show_events: bool,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: "txscope> ".into(),
            show_events: true,
        }
    }
}

/// The interactive REPL.
pub struct Repl {
    session: Session,
    config: ReplConfig,
    history: Vec<String>,
    /// Journal entries already echoed.
    echoed: usize,
}

impl Repl {
    /// Create a new REPL over the given session.
    pub fn new(session: Session) -> Self {
        Self::with_config(session, ReplConfig::default())
    }

    /// Create a REPL with custom configuration.
    pub fn with_config(session: Session, config: ReplConfig) -> Self {
        Self {
            session,
            config,
            history: Vec::new(),
            echoed: 0,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run the REPL on stdin/stdout.
    pub fn run(&mut self) -> ShellResult<()> {
        self.print_banner();

        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("{}", self.config.prompt);
            stdout.flush()?;

            let mut line = String::new();
            if stdin.lock().read_line(&mut line)? == 0 {
                // EOF.
                println!("\nGoodbye!");
                break;
            }

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.history.push(line.to_string());

            if self.is_command(line) {
                match self.handle_command(line) {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(e) => eprintln!("Error: {}", e),
                }
                continue;
            }

            for output in self.eval(line) {
                println!("{}", output);
            }
        }

        Ok(())
    }

    /// Evaluate semicolon-separated statements, returning display lines.
    ///
    /// Unlike `Session::execute_batch`, keeps going after a failed statement.
    pub fn eval(&mut self, input: &str) -> Vec<String> {
        let mut out = Vec::new();

        for stmt in input.split(';') {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            match self.session.execute(stmt) {
                Ok(line) => out.push(line),
                Err(e) => out.push(format!("Error: {}", e)),
            }
            let fresh = self.session.events_since(self.echoed);
            self.echoed += fresh.len();
            if self.config.show_events {
                for event in &fresh {
                    match serde_json::to_string(event) {
                        Ok(json) => out.push(format!("  {}", json)),
                        Err(e) => out.push(format!("  <unprintable event: {}>", e)),
                    }
                }
            }
        }

        out
    }

    fn print_banner(&self) {
        println!("txscope v{}", env!("CARGO_PKG_VERSION"));
        println!("Transaction propagation shell. Type .help for commands.");
        println!();
    }

    fn is_command(&self, input: &str) -> bool {
        if input.starts_with('.') || input.starts_with('\\') {
            return true;
        }
        // Bare shell words are accepted too.
        matches!(
            input.to_lowercase().as_str(),
            "status" | "events" | "help" | "quit" | "exit"
        )
    }

    fn handle_command(&mut self, cmd: &str) -> ShellResult<bool> {
        let cmd = cmd.trim_start_matches(&['.', '\\'][..]);
        let parts: Vec<&str> = cmd.split_whitespace().collect();
        let command = parts.first().map(|s| s.to_lowercase());

        match command.as_deref() {
            Some("help") | Some("h") | Some("?") => {
                self.print_help();
            }
            Some("quit") | Some("exit") | Some("q") => {
                return Ok(true);
            }
            Some("status") | Some("s") => {
                println!("{}", self.session.describe());
            }
            Some("transactions") | Some("tx") => {
                let manager = self.session.manager();
                for id in manager.active_transactions() {
                    if let Some(info) = manager.transaction_info(&id) {
                        println!("{}", serde_json::to_string(&info)?);
                    }
                }
            }
            Some("events") => {
                for event in self.session.events() {
                    println!("{}", serde_json::to_string(&event)?);
                }
            }
            Some("echo") => {
                self.config.show_events = !self.config.show_events;
                println!("Events: {}", if self.config.show_events { "on" } else { "off" });
            }
            Some("config") => {
                println!("{}", serde_json::to_string_pretty(self.session.manager().config())?);
            }
            Some("history") => {
                self.print_history();
            }
            Some(cmd) => {
                eprintln!("Unknown command: .{}", cmd);
                eprintln!("Type .help for available commands");
            }
            None => {}
        }

        Ok(false)
    }

    fn print_help(&self) {
        println!("Commands:");
        println!("  .help, .h, .?           Show this help message");
        println!("  .quit, .exit, .q        Exit the REPL");
        println!("  .status, .s             Show context, scopes and pool counters");
        println!("  .transactions, .tx      List in-flight physical transactions");
        println!("  .events                 Show the full physical event journal");
        println!("  .echo                   Toggle event output after each statement");
        println!("  .config                 Show the manager configuration");
        println!("  .history                Show command history");
        println!();
        println!("Statements (separate with ';'):");
        println!("  BEGIN [PROPAGATION] [READONLY] [NAME]");
        println!("  COMMIT                  Commit the innermost open scope");
        println!("  ROLLBACK                Roll back the innermost open scope");
        println!("  ROLLBACK-ONLY           Mark the innermost open scope rollback-only");
        println!();
        println!("Propagation (default REQUIRED):");
        for propagation in Propagation::ALL {
            println!("  {:<22}  {}", propagation.as_str(), propagation.description());
        }
        println!();
    }

    fn print_history(&self) {
        println!("Command History:");
        for (i, cmd) in self.history.iter().enumerate() {
            println!("  {}: {}", i + 1, cmd);
        }
    }
}
