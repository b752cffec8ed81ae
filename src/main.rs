use cli::Cli;

#[tokio::main]
async fn main() {
    Cli::handle().await.unwrap_or_else(|err| {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    });
}
