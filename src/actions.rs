//! Running ban commands for matched records.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cmd_abstraction::{env_vars, CommandExecutor};
use crate::pipeline::Stage;
use crate::record::{Record, Rejection};

/// Action name to command template
pub type ActionMap = HashMap<String, String>;

const NO_DESCRIPTION: &str = "no description";

/// Substitute `$ip` and `$desc` into a command template.
pub fn render(template: &str, ip: &str, desc: &str) -> String {
    let desc = if desc.is_empty() { NO_DESCRIPTION } else { desc };
    template.replace("$ip", ip).replace("$desc", desc)
}

/// Runs the templates named by a record's action field.
pub struct ActionDispatcher {
    actions: ActionMap,
    executor: Arc<dyn CommandExecutor>,
}

impl ActionDispatcher {
    pub fn new(actions: ActionMap, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { actions, executor }
    }

    /// Resolve the command for one action name, if it is registered.
    pub fn command_for(&self, name: &str, record: &Record) -> Option<String> {
        self.actions
            .get(name)
            .map(|tmpl| render(tmpl, &record.ip, &record.desc))
    }

    fn environment(name: &str, record: &Record) -> Vec<(String, String)> {
        let desc = if record.desc.is_empty() {
            NO_DESCRIPTION
        } else {
            record.desc.as_str()
        };
        env_vars([
            ("SB_IP", record.ip.clone()),
            ("SB_DESC", desc.to_string()),
            ("SB_BANTIME", record.bantime.to_string()),
            ("SB_FILENAME", record.filename.clone()),
            ("SB_LINE", record.line.clone()),
            ("SB_NAME", name.to_string()),
            ("SB_UNBANACTION", record.unban_action.clone()),
        ])
    }

    /// Run one resolved command. Returns true on success.
    async fn execute(&self, name: &str, command: &str, record: &Record) -> bool {
        if record.dry_run {
            info!(
                "DRY RUN action={} file={} ip={} command: {}",
                name, record.filename, record.ip, command
            );
            return true;
        }

        let env = Self::environment(name, record);
        match self.executor.run(command, &env).await {
            Ok(output) if output.success => true,
            Ok(output) => {
                warn!(
                    "Action {} failed for {} (exit {:?}): {}",
                    name,
                    record.ip,
                    output.code,
                    output.stderr.trim()
                );
                false
            }
            Err(e) => {
                warn!("Action {} could not run for {}: {:#}", name, record.ip, e);
                false
            }
        }
    }
}

#[async_trait]
impl Stage for ActionDispatcher {
    fn name(&self) -> &'static str {
        "actions"
    }

    async fn handle(&mut self, record: &mut Record) {
        if record.is_rejected() {
            return;
        }

        let names: Vec<String> = record.action_names().map(str::to_string).collect();
        if names.is_empty() {
            record.reject(Rejection::NoAction);
            return;
        }

        let mut known = 0;
        let mut succeeded = false;
        for name in &names {
            let Some(command) = self.command_for(name, record) else {
                warn!("Unknown action: {}", name);
                continue;
            };
            known += 1;
            if self.execute(name, &command, record).await {
                succeeded = true;
            }
        }

        if known == 0 {
            record.reject(Rejection::UnknownAction);
        } else if succeeded {
            record.mark_actioned();
        }
    }
}
