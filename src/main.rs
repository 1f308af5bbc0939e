#[macro_use]
extern crate log;

use simplelog::{CombinedLogger, Config, Level, LevelFilter, TermLogger};
use std::io;
use std::sync::mpsc::channel;
use std::time::Duration;

use dht_routing::{Key, Node, RoutingConfig, RoutingResult};

fn wait(node: &Node, target: &Key, config: RoutingConfig) -> Option<RoutingResult> {
    let (tx, rx) = channel();
    node.lookup(target, config).add_listener(move |completion| {
        if tx.send(completion.result()).is_err() {
            warn!("Lookup finished after the caller stopped waiting.");
        }
    });
    rx.recv_timeout(Duration::from_secs(60)).ok().and_then(|result| result)
}

fn main() {
    let logger_config = Config {
        time: Some(Level::Error),
        level: Some(Level::Error),
        target: None,
        location: None,
        time_format: None,
    };
    CombinedLogger::init(vec![
        TermLogger::new(LevelFilter::Info, logger_config).unwrap(),
    ])
    .unwrap();

    let mut nodes: Vec<Node> = Vec::new();
    for i in 0..20 {
        let bootstrap = nodes.last().map(|node| node.node_data());
        let node = Node::new("localhost", &(8900 + i).to_string(), bootstrap)
            .expect("Error: could not bind to address.");
        let own_id = node.node_data().id;
        if i > 0 {
            wait(&node, &own_id, RoutingConfig::default());
        }
        nodes.push(node);
    }

    for node in nodes.iter().filter(|node| node.node_data().id.0[0] % 5 == 0) {
        node.kill();
    }

    let input = io::stdin();

    loop {
        let mut buffer = String::new();
        println!("Ready for input!");
        if input.read_line(&mut buffer).is_err() || buffer.is_empty() {
            break;
        }
        let args: Vec<&str> = buffer.trim_end().split(' ').collect();
        let index = match args.get(1).and_then(|arg| arg.parse::<usize>().ok()) {
            Some(index) if index < nodes.len() => index,
            _ => continue,
        };
        match args[0] {
            "find" => {
                let target = match args.get(2) {
                    Some(name) => Key::hash(name.as_bytes()),
                    None => Key::rand(),
                };
                let result = wait(&nodes[index], &target, RoutingConfig::default());
                info!("{:#?}", result);
            },
            "node" => {
                let target = nodes[(index + 1) % nodes.len()].node_data().id;
                let config = RoutingConfig::default().with_direct_hits(1);
                let result = wait(&nodes[index], &target, config);
                info!("{:#?}", result);
            },
            "tcp" => {
                let target = Key::rand();
                let config = RoutingConfig::default().with_force_tcp(true);
                let result = wait(&nodes[index], &target, config);
                info!("{:#?}", result);
            },
            "alive" => info!("{}", nodes[index].is_active()),
            _ => {},
        }
    }
}
