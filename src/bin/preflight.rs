use serde_json::json;
use signchain::infra::config::Config;
use signchain::infra::ethereum::rpc::parse_quantity;
use signchain::infra::ethereum::JsonRpcClient;
use signchain::storage::{PostgresStore, Store};

fn usage_and_exit() -> ! {
    eprintln!(
        "Usage: cargo run --bin preflight\n\
         \n\
         Checks the configured integrations before starting api_server.\n\
         Requires env vars:\n\
           BIOMETRIC_SECRET\n\
         Optional:\n\
           DATABASE_URL, ETH_RPC_URL, CREDENTIAL_CONTRACT_ADDRESS, NOTARY_FROM_ADDRESS, FACE_SERVICE_URL\n"
    );
    std::process::exit(2);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        usage_and_exit();
    }

    let config = Config::from_env()?;
    println!("> Preflight:");
    println!("  {:#?}", config);

    let mut failures = 0usize;

    // Database
    match &config.database_url {
        Some(url) => match PostgresStore::connect(url, 1).await {
            Ok(store) => match store.ping().await {
                Ok(()) => println!("  Database: reachable, schema ensured."),
                Err(e) => {
                    failures += 1;
                    eprintln!("  Database: ping failed: {}", e);
                }
            },
            Err(e) => {
                failures += 1;
                eprintln!("  Database: connect failed: {}", e);
            }
        },
        None => println!("  Database: DATABASE_URL not set, api_server will use the in-memory store."),
    }

    // Chain
    match &config.chain {
        Some(chain) => {
            let rpc = JsonRpcClient::new(chain.rpc_url.clone(), chain.timeout)?;
            match rpc.chain_id().await {
                Ok(id) => println!("  RPC chain id: {}", id),
                Err(e) => {
                    failures += 1;
                    eprintln!("  RPC: eth_chainId failed: {}", e);
                }
            }
            match rpc.block_number().await {
                Ok(n) => println!("  RPC head block: {}", n),
                Err(e) => {
                    failures += 1;
                    eprintln!("  RPC: eth_blockNumber failed: {}", e);
                }
            }
            match rpc.call("eth_getCode", json!([chain.contract_address, "latest"])).await {
                Ok(code) if code.as_str().map(|c| c.len() > 2).unwrap_or(false) => {
                    println!("  Contract {} is deployed.", chain.contract_address)
                }
                Ok(_) => {
                    failures += 1;
                    eprintln!("  Contract {} has no code on this chain.", chain.contract_address);
                }
                Err(e) => {
                    failures += 1;
                    eprintln!("  RPC: eth_getCode failed: {}", e);
                }
            }
            match rpc.call("eth_getBalance", json!([chain.from_address, "latest"])).await {
                Ok(v) => match parse_quantity(&v) {
                    Some(0) => eprintln!("  Warning: notary account {} has zero balance.", chain.from_address),
                    Some(wei) => println!("  Notary account {} balance: {} wei", chain.from_address, wei),
                    None => eprintln!("  Warning: could not parse balance of {}", chain.from_address),
                },
                Err(e) => eprintln!("  Warning: eth_getBalance failed: {}", e),
            }
        }
        None => println!("  Chain: ETH_RPC_URL not set, api_server will use the mock notary."),
    }

    // Face service
    match &config.face_service {
        Some(face) => {
            let client = reqwest::Client::builder().timeout(face.timeout).build()?;
            match client.get(format!("{}/", face.url)).send().await {
                Ok(resp) if resp.status().is_success() => println!("  Face service {} is up.", face.url),
                Ok(resp) => {
                    failures += 1;
                    eprintln!("  Face service {} answered {}", face.url, resp.status());
                }
                Err(e) => {
                    failures += 1;
                    eprintln!("  Face service {} unreachable: {}", face.url, e);
                }
            }
        }
        None => println!("  Face service: FACE_SERVICE_URL not set, face biometrics are disabled."),
    }

    if failures > 0 {
        anyhow::bail!("preflight found {} problem(s)", failures);
    }
    println!("> Preflight OK.");
    Ok(())
}
