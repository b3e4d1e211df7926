//! # Command-Line Client
//!
//! Purpose: Send one command to a server and print the reply, or stay
//! subscribed and print published messages.
//!
//! ```text
//! hkv-cli <addr | config.json> <COMMAND> [ARGS...]
//! hkv-cli 127.0.0.1:6379 SET greeting hello
//! hkv-cli client.json SUBSCRIBE news alerts
//! ```
//!
//! Log output is controlled through `RUST_LOG` (default `hkv_async=info`).

use std::env;
use std::path::Path;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use hkv_async::{Client, ClientConfig, Message, Value};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hkv_async=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut args = env::args().skip(1);
    let Some(target) = args.next() else {
        bail!("usage: hkv-cli <addr | config.json> <COMMAND> [ARGS...]");
    };
    let words: Vec<String> = args.collect();
    let Some((name, params)) = words.split_first() else {
        bail!("missing command");
    };

    let config = load_config(&target)?;
    let addr = config.addr.clone();
    let client = Client::connect(config)
        .await
        .with_context(|| format!("connect to {addr}"))?;

    let params: Vec<Bytes> = params.iter().map(|word| Bytes::from(word.clone())).collect();
    match name.to_ascii_uppercase().as_str() {
        "SUBSCRIBE" => {
            client.subscribe(params, print_message).await?;
            wait_for_interrupt().await?;
        }
        "PSUBSCRIBE" => {
            client.psubscribe(params, print_message).await?;
            wait_for_interrupt().await?;
        }
        _ => {
            let reply = client.invoke(name, params).await?;
            print_value(&reply, 0);
        }
    }

    client.close().await;
    client.shutdown();
    Ok(())
}

fn load_config(target: &str) -> Result<ClientConfig> {
    if target.ends_with(".json") {
        let config = ClientConfig::from_json_file(Path::new(target))
            .with_context(|| format!("load {target}"))?;
        Ok(config)
    } else {
        Ok(ClientConfig::new(target))
    }
}

async fn wait_for_interrupt() -> Result<()> {
    tokio::signal::ctrl_c().await.context("wait for ctrl-c")
}

fn print_message(message: Message, _client: &Client) {
    let channel = String::from_utf8_lossy(&message.channel);
    let payload = String::from_utf8_lossy(&message.payload);
    match &message.pattern {
        Some(pattern) => println!("[{}] {channel}: {payload}", String::from_utf8_lossy(pattern)),
        None => println!("{channel}: {payload}"),
    }
}

fn print_value(value: &Value, depth: usize) {
    let indent = "  ".repeat(depth);
    match value {
        Value::Nil => println!("{indent}(nil)"),
        Value::Bool(flag) => println!("{indent}{}", if *flag { "OK" } else { "(false)" }),
        Value::Int(number) => println!("{indent}(integer) {number}"),
        Value::Status(text) => println!("{indent}{text}"),
        Value::Data(data) => println!("{indent}\"{}\"", String::from_utf8_lossy(data)),
        Value::Error(text) => println!("{indent}(error) {text}"),
        Value::Array(items) => {
            if items.is_empty() {
                println!("{indent}(empty array)");
            }
            for item in items {
                print_value(item, depth + 1);
            }
        }
        Value::Map(pairs) => {
            for (field, item) in pairs {
                println!("{indent}{}:", String::from_utf8_lossy(field));
                print_value(item, depth + 1);
            }
        }
    }
}
