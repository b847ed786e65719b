#[tokio::main]
async fn main() {
    if let Err(e) = rtrace::app::run::main_with_error().await {
        eprintln!("rtrace: {:#}", e);
        std::process::exit(1);
    }
}
