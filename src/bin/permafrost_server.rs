use std::{
    error::Error,
    net::SocketAddr,
    sync::{Arc, mpsc},
};

use clap::Parser;
use log::info;

use permafrost::store::contiguous_strides;
use permafrost::{ArrayValue, Dtype, Node, StateServer, StateStore};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen for connections at address
    address: SocketAddr,
    /// Number of layers in the demo parameter tree
    #[arg(long, default_value_t = 4)]
    layers: usize,
    /// Elements per side of each square weight tensor
    #[arg(long, default_value_t = 64)]
    dim: usize,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let store = Arc::new(demo_store(cli.layers, cli.dim)?);

    let mut server = StateServer::new(cli.address, store);
    server.start()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    rx.recv()?;
    info!("interrupted, shutting down");
    server.stop();
    Ok(())
}

/// A stand-in parameter tree: per-layer square weight tensors and biases
/// plus a few run-metadata scalars.
fn demo_store(layers: usize, dim: usize) -> Result<StateStore, Box<dyn Error>> {
    let mut layer_list = Node::list();
    for i in 0..layers {
        let fill = (i % 251) as u8;
        let weight = ArrayValue::new(
            Dtype::F32,
            vec![dim, dim],
            contiguous_strides(&[dim, dim]),
            vec![fill; dim * dim * 4],
        )?;
        let bias = ArrayValue::new(Dtype::F32, vec![dim], vec![1], vec![fill; dim * 4])?;

        let mut layer = Node::map();
        layer.insert("weight", Node::array(weight));
        layer.insert("bias", Node::array(bias));
        layer_list.push(layer);
    }

    let mut model = Node::map();
    model.insert("layers", layer_list);
    model.insert("name", Node::scalar("demo"));
    model.insert("step", Node::scalar(0i64));
    model.insert("lr", Node::scalar(1e-3));
    model.insert("frozen", Node::scalar(true));

    let mut root = Node::map();
    root.insert("model", model);
    Ok(StateStore::new(root))
}
