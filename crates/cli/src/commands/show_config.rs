use anyhow::Result;
use clap::Args;
use swing_trade_core::AppConfig;

#[derive(Args, Debug)]
pub struct ShowConfigArgs {
    /// Print a single section (e.g. "sizing")
    #[arg(long)]
    pub section: Option<String>,
}

/// Prints the configuration after files and `SWING_*` overrides are applied.
pub fn run(args: &ShowConfigArgs, config: &AppConfig) -> Result<()> {
    let mut value = serde_json::to_value(config)?;
    if let Some(section) = &args.section {
        value = value
            .get(section.as_str())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unknown config section: {section}"))?;
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
