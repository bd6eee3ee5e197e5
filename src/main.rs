use colored::Colorize;

#[tokio::main]
async fn main() {
    if let Err(e) = homework_solver::cli::main().await {
        eprintln!("{} {e:#}", "Error:".red().bold());
        std::process::exit(1);
    }
}
