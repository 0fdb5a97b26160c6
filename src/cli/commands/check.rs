//! Check command.

use console::style;

use pubnotice::vpn::MullvadVpn;
use pubnotice::Config;

/// Report whether the paid services and the VPN are usable.
pub async fn cmd_check(config: &Config) -> anyhow::Result<()> {
    println!("\n{}", style("Service Status").bold());
    println!("{}", "-".repeat(50));

    println!("\n{}", style("API Keys:").cyan());
    let solver = match &config.solver.api_key {
        None => style("✗ TWO_CAPTCHA_API_KEY not set".to_string()).red(),
        Some(_) if config.solver.key_looks_valid() => style("✓ configured".to_string()).green(),
        Some(key) => style(format!("✗ key looks too short ({} chars)", key.len())).red(),
    };
    println!("  {:<15} {}", "2captcha", solver);

    let llm = match &config.llm.api_key {
        None => style("○ not set, pattern extraction only".to_string()).yellow(),
        Some(_) if config.llm.key_looks_valid() => style("✓ configured".to_string()).green(),
        Some(_) => style("✗ key should start with sk-".to_string()).red(),
    };
    println!("  {:<15} {}", "OpenAI", llm);
    if config.llm.is_configured() {
        println!("                  {}", style(&config.llm.model).dim());
    }

    println!("\n{}", style("VPN:").cyan());
    match MullvadVpn::find_binary() {
        Some(path) => {
            println!(
                "  {:<15} {}",
                "mullvad",
                style(format!("✓ {}", path.display())).green()
            );
            if config.vpn.enabled {
                match config.vpn.controller() {
                    Ok(mut vpn) => match vpn.status().await {
                        Ok(status) => println!("                  {}", style(status).dim()),
                        Err(e) => println!("                  {}", style(e).red()),
                    },
                    Err(e) => println!("                  {}", style(e).red()),
                }
            }
        }
        None => {
            let status = if config.vpn.enabled {
                style("✗ not found, but VPN is enabled").red()
            } else {
                style("○ not found (VPN disabled)").dim()
            };
            println!("  {:<15} {}", "mullvad", status);
        }
    }

    println!(
        "\n  {:<15} {}",
        "Output",
        style(config.output_dir().display()).dim()
    );
    if let Some(path) = &config.source_path {
        println!("  {:<15} {}", "Config", style(path.display()).dim());
    }
    println!();

    Ok(())
}
