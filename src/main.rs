#[allow(non_snake_case)]
pub mod Examples;
#[allow(non_snake_case)]
pub mod Preparation;
pub mod drug_catalog;
pub mod protocol_config;

use Examples::dst_examples::dst_examples;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

pub fn main() {
    if let Err(e) = TermLogger::init(
        LevelFilter::Info,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("logging disabled: {}", e);
    }
    // task number as the first argument, 0 = full panel
    let task: usize = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(0);
    dst_examples(task);
}
