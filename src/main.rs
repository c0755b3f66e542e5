use clap::Parser;
use signpad::{
    config::{Args, Config},
    server, App,
};

fn main() {
    // A missing .env file is fine, the environment and flags still apply.
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let result = Config::from_args(args)
        .and_then(App::new)
        .and_then(server::run);
    if let Err(err) = result {
        log::error!("{}", err);
        std::process::exit(1);
    }
}
