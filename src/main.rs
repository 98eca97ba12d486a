// This is my entry point for the CeroCoin node binary
// I only parse arguments and load settings here, the node itself lives in the library
use cerocoin::{
    generate_keypair, initialize_node_and_run, write_key_files, Command, NodeConfig, Opt,
};
use clap::Parser;
use log::{error, LevelFilter};
use std::path::Path;
use std::process;

fn main() {
    // Info level by default, RUST_LOG still wins when I set it
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();

    // If something goes wrong, I log the error and exit with code 1
    if let Err(e) = run_command(opt.config.as_deref(), opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

// Settings come from the file first, then the environment, then the flags
fn load_config(path: Option<&Path>) -> cerocoin::Result<NodeConfig> {
    let mut config = match path {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };
    config.apply_env();
    Ok(config)
}

fn run_command(
    config_path: Option<&Path>,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        // When I want to join the network and start mining and trading
        Command::Start(args) => {
            let mut config = load_config(config_path)?;
            args.apply(&mut config);
            initialize_node_and_run(config)?;
        }
        // When I want a key pair without running a node
        Command::Keygen {
            modulus_size,
            out_dir,
        } => {
            let config = load_config(config_path)?;
            let size = modulus_size.unwrap_or(config.modulus_size);
            let (public, private) = generate_keypair(size)?;
            println!("Node id: {}", public.node_id());
            println!("Modulus ({} bits): {}", public.modulus_bits(), public.modulus());
            if let Some(dir) = out_dir {
                let (public_path, private_path) = write_key_files(&dir, &public, &private)?;
                println!("Public key written to {}", public_path.display());
                println!("Private key written to {}", private_path.display());
            }
        }
    }
    Ok(())
}
