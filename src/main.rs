use colored::Colorize;
use nsdbg::commands::Cli;
use nsdbg::logging::init_logging;
use nsdbg::{Orchestrator, SystemProcessTable, TokioRunner};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Err(err) = init_logging(cli.verbose) {
        eprintln!("failed to initialise logging: {}", err);
    }

    if !cfg!(unix) {
        eprintln!("{} running on unsupported operating system", "error:".red().bold());
        return ExitCode::from(1);
    }

    let mut orchestrator = Orchestrator::new(cli.launch_options(), TokioRunner, SystemProcessTable);

    let cancel = orchestrator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    match orchestrator.run().await {
        Ok(report) => {
            tracing::debug!(
                "session complete: launcher={} target={} wine_pid={} debugger={}",
                report.launcher_pid,
                report.target_pid,
                report.debuggee_pid,
                report.debugger_status
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::debug!(
                "{} error at stage {}",
                err.category().display_name(),
                orchestrator.stage()
            );
            eprintln!("{} {}", "error:".red().bold(), err.user_message());
            ExitCode::from(err.exit_code())
        }
    }
}
