use std::{error::Error, net::SocketAddr};

use clap::{Parser, ValueEnum};

use permafrost::{Path, StateClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Kind {
    Array,
    Int,
    Float,
    Str,
    Bool,
}

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address
    address: SocketAddr,
    /// Path of the value to fetch, e.g. model[layers][0][weight]
    path: String,
    /// What kind of value lives at the path
    #[arg(long, value_enum, default_value_t = Kind::Array)]
    kind: Kind,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let path: Path = cli.path.parse()?;
    let client = StateClient::new(cli.address);

    match cli.kind {
        Kind::Array => {
            let array = client.get_array(&path)?;
            println!(
                "{:?} array, shape {:?}, stride {:?}, {} bytes",
                array.dtype(),
                array.shape(),
                array.stride(),
                array.bytes().len()
            );
            let head: Vec<u8> = array.bytes().iter().take(16).copied().collect();
            println!("first bytes: {head:?}");
        }
        Kind::Int => println!("{}", client.get_int(&path)?),
        Kind::Float => println!("{}", client.get_float(&path)?),
        Kind::Str => println!("{}", client.get_str(&path)?),
        Kind::Bool => println!("{}", client.get_bool(&path)?),
    }

    Ok(())
}
