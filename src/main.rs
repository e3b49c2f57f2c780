//! acp: a minimal command-line driver for the ACP client library.

use acp_client::{client::DEFAULT_PORT, Client};
use acp_codec::property::Property;
use anyhow::{bail, Context};

const USAGE: &str = "\
usage: acp <host>[:port] <password> <command> [args]

commands:
  getprop <tag> [tag ...]     read properties
  setprop <tag>=<value> ...   write text-valued properties
  features                    dump the device feature tree
  reboot                      reboot the base station
";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 3 {
        eprint!("{USAGE}");
        std::process::exit(2);
    }

    let (host, port) = match args[0].split_once(':') {
        Some((host, port)) => (
            host.to_string(),
            port.parse::<u16>().context("invalid port")?,
        ),
        None => (args[0].clone(), DEFAULT_PORT),
    };
    let password = &args[1];
    let command = args[2].as_str();
    let rest = &args[3..];

    let client = Client::connect(&host, port, password)
        .await
        .with_context(|| format!("connecting to {host}:{port}"))?;
    client.authenticate().await.context("authentication failed")?;

    match command {
        "getprop" => {
            if rest.is_empty() {
                bail!("getprop requires at least one tag");
            }
            let tags: Vec<&str> = rest.iter().map(String::as_str).collect();
            for prop in client.get_properties(&tags).await? {
                println!("{prop}");
            }
        }
        "setprop" => {
            let mut properties = Vec::new();
            for arg in rest {
                let (tag, value) = arg
                    .split_once('=')
                    .with_context(|| format!("expected <tag>=<value>, got {arg:?}"))?;
                properties.push(Property::new(tag, value)?);
            }
            if properties.is_empty() {
                bail!("setprop requires at least one <tag>=<value>");
            }
            client.set_properties(&properties).await?;
            println!("ok");
        }
        "features" => {
            println!("{:#?}", client.get_features().await?);
        }
        "reboot" => {
            client.reboot().await?;
            println!("reboot requested");
        }
        other => bail!("unknown command {other:?}\n{USAGE}"),
    }

    client.close().await;
    Ok(())
}
