//! `taskloom actions`: List built-in workflow actions.

use taskloom_workflow::{ActionRegistry, ActionServices};

use super::runtime::CliResult;

pub async fn run() -> CliResult<()> {
    let registry = ActionRegistry::with_builtins(ActionServices::default());
    println!("⚙️  {} action(s)", registry.len());
    println!();
    let width = registry.names().iter().map(|n| n.len()).max().unwrap_or(0);
    for action in registry.list() {
        println!("  {:<width$}  {}", action.name, action.description);
    }
    Ok(())
}
