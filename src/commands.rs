//! Built-in debugger commands
//!
//! Each command is a thin handler over [`DapEngine`]; results are printed to
//! stdout so they reach a remote client too.

use async_trait::async_trait;

use crate::common::{Error, Result};
use crate::engine::{DapEngine, Engine};
use crate::session::table::{CommandHandler, CommandTable};

/// Frames shown by `stack` without an explicit depth
const DEFAULT_STACK_DEPTH: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Help,
    Break,
    Watch,
    Clear,
    Breakpoints,
    Continue,
    Next,
    Step,
    StepOut,
    Threads,
    Stack,
}

/// Names (first is canonical), operation and usage line
const COMMANDS: &[(&[&str], Op, &str)] = &[
    (&["help"], Op::Help, "help                 Show this list"),
    (
        &["break", "b"],
        Op::Break,
        "break|b <location>   Set a breakpoint at file:line, function or *0xADDR",
    ),
    (
        &["watch"],
        Op::Watch,
        "watch <expression>   Stop when the expression is written",
    ),
    (&["clear"], Op::Clear, "clear <id>           Remove a breakpoint"),
    (
        &["breakpoints", "bp"],
        Op::Breakpoints,
        "breakpoints|bp       List breakpoints",
    ),
    (&["continue", "c"], Op::Continue, "continue|c           Resume execution"),
    (&["next", "n"], Op::Next, "next|n               Step over"),
    (&["step", "s"], Op::Step, "step|s               Step into"),
    (
        &["stepout", "finish"],
        Op::StepOut,
        "stepout|finish       Run until the current function returns",
    ),
    (&["threads"], Op::Threads, "threads              List threads"),
    (
        &["stack", "bt"],
        Op::Stack,
        "stack|bt [depth]     Show the call stack",
    ),
];

/// `exit` is handled by the session, not the table
const EXIT_USAGE: &str = "exit                 Detach and leave the debugger";

struct Builtin {
    op: Op,
    usage: &'static str,
}

fn required<'a>(args: &'a [String], name: &'static str) -> Result<&'a str> {
    args.first()
        .map(String::as_str)
        .ok_or(Error::MissingArgument(name))
}

fn parse_number<T: std::str::FromStr>(value: &str, name: &'static str) -> Result<T> {
    value.parse().map_err(|_| Error::InvalidArgument {
        name,
        value: value.to_string(),
    })
}

#[async_trait]
impl CommandHandler<DapEngine> for Builtin {
    async fn call(&self, engine: &mut DapEngine, args: &[String]) -> Result<()> {
        match self.op {
            Op::Help => {
                for (_, _, usage) in COMMANDS {
                    println!("{}", usage);
                }
                println!("{}", EXIT_USAGE);
            }

            Op::Break => {
                let location = required(args, "location")?;
                let bp = engine.set_breakpoint(location).await?;
                println!("Breakpoint {} set at {}", bp.id, bp.location);
            }

            Op::Watch => {
                let expression = args.join(" ");
                if expression.is_empty() {
                    return Err(Error::MissingArgument("expression"));
                }
                let bp = engine.watch(&expression).await?;
                println!("Watchpoint {} set on {}", bp.id, bp.location);
            }

            Op::Clear => {
                let id = parse_number(required(args, "breakpoint id")?, "breakpoint id")?;
                let bp = engine.clear(id).await?;
                println!("Breakpoint {} removed from {}", bp.id, bp.location);
            }

            Op::Breakpoints => {
                let breakpoints = engine.breakpoints();
                if breakpoints.is_empty() {
                    println!("No breakpoints set");
                } else {
                    println!("Breakpoints:");
                    for bp in &breakpoints {
                        println!("  {}", bp);
                    }
                }
            }

            Op::Continue => {
                engine.continue_execution().await?;
                println!("Continuing execution...");
            }

            Op::Next => {
                engine.next().await?;
                println!("Stepping over...");
            }

            Op::Step => {
                engine.step_in().await?;
                println!("Stepping into...");
            }

            Op::StepOut => {
                engine.step_out().await?;
                println!("Stepping out...");
            }

            Op::Threads => {
                let threads = engine.threads().await?;
                if threads.is_empty() {
                    println!("No threads");
                } else {
                    println!("Threads:");
                    for thread in &threads {
                        println!("  {} - {}", thread.id, thread.name);
                    }
                }
            }

            Op::Stack => {
                let depth = match args.first() {
                    Some(depth) => parse_number(depth, "depth")?,
                    None => DEFAULT_STACK_DEPTH,
                };
                let frames = engine.stack_trace(depth).await?;
                if frames.is_empty() {
                    println!("No stack frames");
                }
                for (i, frame) in frames.iter().enumerate() {
                    let source = frame
                        .source
                        .as_ref()
                        .and_then(|s| s.path.as_deref().or(s.name.as_deref()));
                    match source {
                        Some(source) => {
                            println!("#{} {} at {}:{}", i, frame.name, source, frame.line)
                        }
                        None => match &frame.instruction_pointer_reference {
                            Some(ip) => println!("#{} {} at {}", i, frame.name, ip),
                            None => println!("#{} {}", i, frame.name),
                        },
                    }
                }
            }
        }
        Ok(())
    }

    fn help(&self) -> &str {
        self.usage
    }
}

/// The command table served by `dbg`
pub fn debug_commands() -> CommandTable<DapEngine> {
    let mut table = CommandTable::new();
    for &(names, op, usage) in COMMANDS {
        table.register(names, Builtin { op, usage });
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_command_and_alias_is_registered() {
        let table = debug_commands();
        for name in [
            "help",
            "break",
            "b",
            "watch",
            "clear",
            "breakpoints",
            "bp",
            "continue",
            "c",
            "next",
            "n",
            "step",
            "s",
            "stepout",
            "finish",
            "threads",
            "stack",
            "bt",
        ] {
            assert!(table.contains(name), "{name} is missing");
        }
        assert!(!table.contains("exit"));
    }

    #[test]
    fn test_aliases_share_usage() {
        let table = debug_commands();
        assert_eq!(table.find("b").help(), table.find("break").help());
        assert!(table.find("bt").help().starts_with("stack|bt"));
        assert_eq!(table.find("frobnicate").help(), "");
    }

    #[test]
    fn test_argument_helpers() {
        let args = vec!["12".to_string()];
        assert_eq!(required(&args, "id").unwrap(), "12");
        assert!(matches!(
            required(&[], "location"),
            Err(Error::MissingArgument("location"))
        ));
        assert_eq!(parse_number::<u32>("12", "id").unwrap(), 12);
        assert_eq!(
            parse_number::<u32>("twelve", "breakpoint id")
                .unwrap_err()
                .to_string(),
            "Invalid breakpoint id: twelve"
        );
    }
}
