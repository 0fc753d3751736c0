mod cli;

use std::sync::Arc;

use clap::Parser;
use cli::{CallSpec, MulticallArgs};
use env_logger::Builder;
use ethereum_json_rpc_client::reqwest::ReqwestClient;
use ethereum_json_rpc_client::EthJsonRpcClient;
use log::SetLoggerError;
use multicall::{Endpoint, EndpointPool, MulticallExecutor};

const PACKAGE: &str = env!("CARGO_PKG_NAME");

type Connection = Arc<EthJsonRpcClient<ReqwestClient>>;

fn main() -> anyhow::Result<()> {
    let args = MulticallArgs::parse();
    init_logger(&args.logger_filter)?;

    log::info!("{PACKAGE}");
    log::info!("----------------------");
    for rpc_url in &args.rpc_urls {
        log::info!(
            "- rpc-url: {} every {:?}",
            rpc_url.url,
            rpc_url.min_interval.unwrap_or(args.min_interval)
        );
    }
    log::info!("- calls: {}", args.calls.len());
    log::info!("----------------------");

    let calls = args
        .calls
        .iter()
        .map(CallSpec::to_call)
        .collect::<Result<Vec<_>, _>>()?;

    let pool = build_pool(&args)?;
    let mut executor = MulticallExecutor::new(Arc::new(pool), args.executor_config())?;

    let futures = calls
        .into_iter()
        .map(|call| executor.submit(call))
        .collect::<Vec<_>>();
    executor.flush();

    let mut failed = 0;
    for (position, future) in futures.iter().enumerate() {
        match future.get_timeout(args.timeout) {
            Ok(value) => println!("{position}: {value}"),
            Err(err) => {
                failed += 1;
                println!("{position}: error: {err}");
            }
        }
    }
    executor.shutdown();

    if failed > 0 {
        anyhow::bail!("{failed} of {} call(s) failed", futures.len());
    }

    Ok(())
}

/// Initializes the logger
fn init_logger(logger_filter: &str) -> Result<(), SetLoggerError> {
    Builder::new().parse_filters(logger_filter).try_init()
}

/// Builds one rate limited endpoint per `--rpc-url`.
fn build_pool(args: &MulticallArgs) -> anyhow::Result<EndpointPool<Connection>> {
    let pool = EndpointPool::new(vec![]);
    for rpc_url in &args.rpc_urls {
        let client = ReqwestClient::new_with_timeout(rpc_url.url.clone(), args.timeout)?;
        let min_interval = rpc_url.min_interval.unwrap_or(args.min_interval);
        pool.add(
            Endpoint::new(Arc::new(EthJsonRpcClient::new(client)), min_interval)
                .with_label(rpc_url.url.clone()),
        );
    }

    Ok(pool)
}
