//! Shell session - one transaction context driven by text statements.

use std::fmt::Write as _;
use std::str::FromStr;

use crate::config::ManagerConfig;
use crate::resource::{ConnectionPool, PoolStats, ResourceEvent};
use crate::shell::{ShellError, ShellResult};
use crate::transaction::{
    Propagation, TransactionContext, TransactionDefinition, TransactionManager, TransactionStatus,
};

/// A parsed shell statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// `BEGIN [PROPAGATION] [READONLY] [NAME]`
    Begin(TransactionDefinition),
    /// `COMMIT` - commits the innermost open scope.
    Commit,
    /// `ROLLBACK` - rolls back the innermost open scope.
    Rollback,
    /// `ROLLBACK-ONLY` - marks the innermost open scope rollback-only.
    RollbackOnly,
}

impl FromStr for Statement {
    type Err = ShellError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split_whitespace();
        let keyword = parts
            .next()
            .map(|k| k.to_lowercase())
            .ok_or_else(|| ShellError::Parse("empty statement".to_string()))?;

        match keyword.as_str() {
            "begin" | "start" => {
                let mut definition = TransactionDefinition::default();
                for arg in parts {
                    let lower = arg.to_lowercase();
                    if lower == "readonly" || lower == "read_only" || lower == "read-only" {
                        definition = definition.read_only(true);
                    } else if let Ok(propagation) = arg.parse::<Propagation>() {
                        definition = definition.propagation(propagation);
                    } else {
                        definition = definition.name(arg);
                    }
                }
                Ok(Statement::Begin(definition))
            }
            "commit" | "end" => Ok(Statement::Commit),
            "rollback" | "abort" => Ok(Statement::Rollback),
            "rollback-only" | "rollback_only" | "setrollbackonly" => Ok(Statement::RollbackOnly),
            other => Err(ShellError::Parse(format!("unknown statement: {}", other))),
        }
    }
}

/// One execution unit with its stack of open scopes.
pub struct Session {
    manager: TransactionManager,
    pool: ConnectionPool,
    ctx: TransactionContext,
    open: Vec<TransactionStatus>,
}

impl Session {
    /// Create a session over a fresh pool sized by the configuration.
    pub fn new(config: ManagerConfig) -> Self {
        let pool = ConnectionPool::new(config.max_connections);
        let manager = TransactionManager::with_config(pool.clone(), config);
        let ctx = manager.new_context();
        Self {
            manager,
            pool,
            ctx,
            open: Vec::new(),
        }
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    pub fn context(&self) -> &TransactionContext {
        &self.ctx
    }

    /// Number of scopes opened and not yet completed.
    pub fn open_scopes(&self) -> usize {
        self.open.len()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Every physical event recorded by the pool so far.
    pub fn events(&self) -> Vec<ResourceEvent> {
        self.pool.events()
    }

    /// Events recorded after the first `seen` entries of the journal.
    pub fn events_since(&self, seen: usize) -> Vec<ResourceEvent> {
        self.pool.events_since(seen)
    }

    /// Drain the physical events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<ResourceEvent> {
        self.pool.take_events()
    }

    /// Parse and execute one statement, returning the text to display.
    pub fn execute(&mut self, input: &str) -> ShellResult<String> {
        let statement: Statement = input.parse()?;
        self.execute_statement(statement)
    }

    /// Execute several statements separated by semicolons.
    ///
    /// Stops at the first failing statement.
    pub fn execute_batch(&mut self, input: &str) -> ShellResult<Vec<String>> {
        let mut results = Vec::new();

        for stmt in input.split(';') {
            let stmt = stmt.trim();
            if stmt.is_empty() {
                continue;
            }
            results.push(self.execute(stmt)?);
        }

        Ok(results)
    }

    pub fn execute_statement(&mut self, statement: Statement) -> ShellResult<String> {
        match statement {
            Statement::Begin(definition) => {
                let status = self.manager.begin(&mut self.ctx, definition)?;
                let line = describe_scope(&status, self.ctx.depth());
                self.open.push(status);
                Ok(line)
            }
            Statement::Commit => self.complete(true),
            Statement::Rollback => self.complete(false),
            Statement::RollbackOnly => {
                let status = self.open.last_mut().ok_or(ShellError::NoOpenScope)?;
                status.set_rollback_only();
                Ok(format!("scope {} marked rollback-only", status.scope_id()))
            }
        }
    }

    fn complete(&mut self, commit: bool) -> ShellResult<String> {
        let mut status = self.open.pop().ok_or(ShellError::NoOpenScope)?;
        let result = if commit {
            self.manager.commit(&mut self.ctx, &mut status)
        } else {
            self.manager.rollback(&mut self.ctx, &mut status)
        };

        let scope = status.scope_id();
        let new_transaction = status.is_new_transaction();
        if !status.is_completed() {
            // The manager refused the call; the scope is still open.
            self.open.push(status);
        }
        result?;

        let verb = if commit { "commit" } else { "rollback" };
        Ok(format!(
            "scope {} {} complete (new_transaction={})",
            scope, verb, new_transaction
        ))
    }

    /// Multi-line summary of the context, registry and pool.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "context {}: active={} depth={} suspended={} rollback_only={}",
            self.ctx.id(),
            self.ctx.current_transaction_id().unwrap_or("-"),
            self.ctx.depth(),
            self.ctx.suspended_count(),
            self.ctx.is_rollback_only()
        );
        for status in &self.open {
            let _ = writeln!(out, "  {}", describe_scope(status, self.ctx.depth()));
        }
        let stats = self.pool.stats();
        let _ = write!(
            out,
            "transactions in flight: {}, pool: created={} in_use={} commits={} rollbacks={}",
            self.manager.active_count(),
            stats.created,
            stats.in_use,
            stats.commits,
            stats.rollbacks
        );
        out
    }
}

fn describe_scope(status: &TransactionStatus, depth: usize) -> String {
    format!(
        "scope {} [{}] new_transaction={} savepoint={} rollback_only={} depth={} tx={} started={}",
        status.scope_id(),
        status.definition().propagation,
        status.is_new_transaction(),
        status.savepoint_name().unwrap_or("-"),
        status.is_rollback_only(),
        depth,
        status.transaction_id().unwrap_or("-"),
        status.started_at().format("%H:%M:%S%.3f")
    )
}
