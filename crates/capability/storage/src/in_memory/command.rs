//! 命令存储内存实现

use crate::error::StorageError;
use crate::traits::{CommandFilter, CommandStore};
use domain::{Command, CommandStatus};
use std::collections::HashMap;
use std::sync::RwLock;

/// 命令内存存储
pub struct InMemoryCommandStore {
    commands: RwLock<HashMap<String, Command>>,
}

impl InMemoryCommandStore {
    /// 创建新的命令存储
    pub fn new() -> Self {
        Self {
            commands: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCommandStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CommandStore for InMemoryCommandStore {
    async fn create_command(&self, command: Command) -> Result<Command, StorageError> {
        let mut commands = self
            .commands
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        if commands.contains_key(&command.command_id) {
            return Err(StorageError::new("command already exists"));
        }
        commands.insert(command.command_id.clone(), command.clone());
        Ok(command)
    }

    async fn find_command(&self, command_id: &str) -> Result<Option<Command>, StorageError> {
        let commands = self
            .commands
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(commands.get(command_id).cloned())
    }

    async fn transition_command(
        &self,
        command_id: &str,
        next: CommandStatus,
        at_ms: i64,
        error_message: Option<String>,
    ) -> Result<Option<Command>, StorageError> {
        let mut commands = self
            .commands
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let Some(command) = commands.get_mut(command_id) else {
            return Ok(None);
        };
        if !command.apply_transition(next, at_ms, error_message) {
            return Ok(None);
        }
        Ok(Some(command.clone()))
    }

    async fn expire_overdue(
        &self,
        now_ms: i64,
        reason: &str,
    ) -> Result<Vec<Command>, StorageError> {
        let mut commands = self
            .commands
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut expired = Vec::new();
        for command in commands.values_mut() {
            if command.is_overdue(now_ms)
                && command.apply_transition(CommandStatus::Expired, now_ms, Some(reason.to_string()))
            {
                expired.push(command.clone());
            }
        }
        expired.sort_by(|a, b| a.issued_at_ms.cmp(&b.issued_at_ms));
        Ok(expired)
    }

    async fn list_commands(&self, filter: &CommandFilter) -> Result<Vec<Command>, StorageError> {
        let commands = self
            .commands
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut items: Vec<Command> = commands
            .values()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect();
        items.sort_by(|a, b| b.issued_at_ms.cmp(&a.issued_at_ms));
        if filter.limit > 0 && items.len() > filter.limit {
            items.truncate(filter.limit);
        }
        Ok(items)
    }
}
