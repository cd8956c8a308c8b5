//! Built-in demo entries
//!
//! Registered in the catalog as native types `ticker` and `greeter`, and
//! available without descriptors through `taskhost run --demo`.

use std::sync::Arc;
use std::time::Duration;
use taskhost_task::{
    task_println, FnEntry, ParameterDef, ParameterDefs, ParameterKind, PromptOptions, TaskCatalog,
    TaskContext, TaskEntry,
};

pub const TICKER: &str = "ticker";
pub const GREETER: &str = "greeter";

pub fn catalog() -> TaskCatalog {
    TaskCatalog::new()
        .with_type(TICKER, ticker)
        .with_type(GREETER, greeter)
}

/// Prints `tick 1`..`tick <count>`, one every `interval` seconds
pub fn ticker() -> Arc<dyn TaskEntry> {
    let mut params = ParameterDefs::new();
    params.insert(
        "count".to_string(),
        ParameterDef::new(ParameterKind::Integer, 5)
            .with_label("Ticks")
            .with_range(1.0, 1000.0),
    );
    params.insert(
        "interval".to_string(),
        ParameterDef::new(ParameterKind::Float, 1.0)
            .with_label("Interval (s)")
            .with_range(0.01, 60.0),
    );

    Arc::new(FnEntry::new("Ticker", run_ticker).with_parameters(params))
}

fn run_ticker(ctx: &TaskContext) -> anyhow::Result<()> {
    let count: u64 = ctx.param_as("count").unwrap_or(5);
    let interval: f64 = ctx.param_as("interval").unwrap_or(1.0);
    let interval = Duration::from_secs_f64(interval.clamp(0.01, 60.0));

    tracing::info!("ticking {} times", count);
    for i in 1..=count {
        task_println!("tick {}", i);
        if i < count {
            ctx.sleep(interval)?;
        }
    }
    Ok(())
}

/// Asks for a name and greets it
pub fn greeter() -> Arc<dyn TaskEntry> {
    Arc::new(FnEntry::new("Greeter", run_greeter).with_headless(false))
}

fn run_greeter(ctx: &TaskContext) -> anyhow::Result<()> {
    let name = ctx.prompt_with("What's your name? ", PromptOptions::default().with_default("world"))?;
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("no name given");
    }
    task_println!("Hello, {}!", name);
    Ok(())
}
