use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use droidrunnerd::adb::AdbInventory;
use droidrunnerd::github::ConfigScript;
use droidrunnerd::log;
use droidrunnerd::manager::Manager;
use droidrunnerd::process::RunShLauncher;
use droidrunnerd::store;
use droidrunnerd::types::ManagerConfig;

#[derive(Parser)]
#[command(
    name = "droidrunnerd",
    about = "Keeps one GitHub Actions runner registered and running per adb-attached Android device"
)]
struct Cli {
    /// GitHub repository or organization URL the runners register against
    #[arg(long, default_value = "https://github.com/emrekultursay/lldb-testing")]
    github_url: String,

    /// Short-lived runner registration token from the repository's
    /// "New self-hosted runner" page; valid for this invocation only
    #[arg(long)]
    runner_token: String,

    /// Base directory holding the runner template and per-device runner state
    /// (default: ~/.gh_test_runner)
    #[arg(long)]
    runner_base_dir: Option<PathBuf>,

    /// Seconds between reconciliation passes
    #[arg(long, default_value_t = 15)]
    poll_interval_secs: u64,

    /// Seconds to wait for a runner to exit gracefully before force-killing
    #[arg(long, default_value_t = 5)]
    grace_period_secs: u64,

    /// Perform a single reconciliation pass and exit instead of looping
    #[arg(long, default_value_t = false)]
    setup: bool,
}

fn default_base_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gh_test_runner")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let base_dir = cli.runner_base_dir.unwrap_or_else(default_base_dir);

    // The only fatal condition, and only before the loop starts.
    std::fs::create_dir_all(&base_dir)
        .with_context(|| format!("cannot create runner base dir {}", base_dir.display()))?;
    log::set_log_file(base_dir.join("manager.log"));

    if !store::template_dir(&base_dir).exists() {
        log::warn(
            "template_missing",
            serde_json::json!({
                "dir": store::template_dir(&base_dir).display().to_string(),
                "hint": "place a pre-fetched actions-runner installation there",
            }),
        );
    }

    let config = ManagerConfig {
        github_url: cli.github_url,
        runner_token: cli.runner_token,
        base_dir,
        poll_interval: Duration::from_secs(cli.poll_interval_secs),
        grace_period: Duration::from_secs(cli.grace_period_secs),
    };

    let control_plane = ConfigScript::new(&config.github_url, &config.runner_token);
    let mut manager = Manager::new(
        config,
        Arc::new(AdbInventory),
        Arc::new(control_plane),
        Arc::new(RunShLauncher),
    );

    if cli.setup {
        manager.run_once().await;
    } else {
        manager.run().await;
    }
    Ok(())
}
