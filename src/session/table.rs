//! Command name to handler lookup

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::common::{Error, Result};

/// A debugger command bound to an engine type
#[async_trait]
pub trait CommandHandler<E>: Send + Sync {
    async fn call(&self, engine: &mut E, args: &[String]) -> Result<()>;

    /// One-line usage text
    fn help(&self) -> &str {
        ""
    }
}

/// Fallback for names that are not registered
struct NotAvailable;

#[async_trait]
impl<E: Send> CommandHandler<E> for NotAvailable {
    async fn call(&self, _engine: &mut E, _args: &[String]) -> Result<()> {
        Err(Error::CommandNotAvailable)
    }
}

pub struct CommandTable<E> {
    handlers: BTreeMap<String, Arc<dyn CommandHandler<E>>>,
    fallback: Arc<dyn CommandHandler<E>>,
}

impl<E: Send + 'static> Default for CommandTable<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send + 'static> CommandTable<E> {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
            fallback: Arc::new(NotAvailable),
        }
    }

    /// Register `handler` under every name in `names` (a command and its aliases)
    pub fn register<H>(&mut self, names: &[&str], handler: H) -> &mut Self
    where
        H: CommandHandler<E> + 'static,
    {
        let handler: Arc<dyn CommandHandler<E>> = Arc::new(handler);
        for name in names {
            self.handlers.insert((*name).to_string(), handler.clone());
        }
        self
    }

    /// Handler for `name`; unknown names get a handler that fails with
    /// "command not available"
    pub fn find(&self, name: &str) -> Arc<dyn CommandHandler<E>> {
        self.handlers
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Push(&'static str);

    #[async_trait]
    impl CommandHandler<Vec<String>> for Push {
        async fn call(&self, engine: &mut Vec<String>, args: &[String]) -> Result<()> {
            engine.push(format!("{} {}", self.0, args.join(" ")));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_aliases_share_a_handler() {
        let mut table = CommandTable::new();
        table.register(&["break", "b"], Push("break"));

        let mut log = Vec::new();
        table
            .find("b")
            .call(&mut log, &["main.c:3".to_string()])
            .await
            .unwrap();
        assert_eq!(log, vec!["break main.c:3"]);
        assert_eq!(table.names().collect::<Vec<_>>(), vec!["b", "break"]);
    }

    #[tokio::test]
    async fn test_unknown_command_is_not_available() {
        let table: CommandTable<Vec<String>> = CommandTable::new();
        assert!(!table.contains("frobnicate"));

        let err = table.find("frobnicate").call(&mut Vec::new(), &[]).await.unwrap_err();
        assert_eq!(err.to_string(), "command not available");
    }
}
