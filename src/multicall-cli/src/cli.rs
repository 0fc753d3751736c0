use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use multicall::config::{DEFAULT_MAX_BATCH_SIZE, DEFAULT_WORKER_COUNT};
use multicall::{Address, Call, ExecutorConfig, MULTICALL3_ADDRESS};

/// Runs read-only contract calls in Multicall3 batches against one or more
/// JSON-RPC endpoints.
#[derive(Debug, Clone, Parser)]
#[clap(version, about)]
pub struct MulticallArgs {
    /// Sets the logger filter.
    /// Valid values: trace, debug, info, warn, error
    /// Example of a valid filter: "warn,multicall=debug".
    #[arg(long, default_value = "info")]
    pub logger_filter: String,

    /// JSON-RPC endpoint, optionally followed by its own minimum interval
    /// between calls, e.g. `https://rpc.example.org@250ms`. Repeatable.
    #[arg(long = "rpc-url", short('u'), required = true)]
    pub rpc_urls: Vec<RpcUrl>,

    /// Minimum interval between two calls on an endpoint without its own.
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    pub min_interval: Duration,

    /// Call to run, as `ADDRESS;SIGNATURE[;ARG]...`, e.g.
    /// `0xdAC17F958D2ee523a2206206994597C13D831ec7;balanceOf(address)(uint256);5041ed759Dd4aFc3a72b8192C143F72f4724081A`.
    /// Repeatable.
    #[arg(long = "call", short('c'), required = true)]
    pub calls: Vec<CallSpec>,

    /// Number of batches executed concurrently.
    #[arg(long, default_value_t = DEFAULT_WORKER_COUNT)]
    pub workers: usize,

    /// Maximum number of calls per aggregate.
    #[arg(long, default_value_t = DEFAULT_MAX_BATCH_SIZE)]
    pub max_batch_size: usize,

    /// Maximum age of a batch before it is sent.
    #[arg(long, default_value = "50ms", value_parser = humantime::parse_duration)]
    pub max_batch_window: Duration,

    /// How often the pending batch is checked against the window.
    #[arg(long, default_value = "10ms", value_parser = humantime::parse_duration)]
    pub tick_interval: Duration,

    /// Address of the aggregator contract, Multicall3 if not set.
    #[arg(long, value_parser = parse_address)]
    pub aggregator: Option<Address>,

    /// How long to wait for each result, and for each HTTP request.
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    pub timeout: Duration,
}

impl MulticallArgs {
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::default()
            .with_worker_count(self.workers)
            .with_max_batch_size(self.max_batch_size)
            .with_max_batch_window(self.max_batch_window)
            .with_tick_interval(self.tick_interval)
            .with_aggregator(self.aggregator.unwrap_or(MULTICALL3_ADDRESS))
    }
}

/// `URL[@INTERVAL]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcUrl {
    pub url: String,
    pub min_interval: Option<Duration>,
}

impl FromStr for RpcUrl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty endpoint url".to_string());
        }

        // `@` may also belong to credentials in the url, so only a parsable
        // duration after the last one counts as an interval
        let (url, min_interval) = match s.rsplit_once('@') {
            Some((url, interval)) => match humantime::parse_duration(interval) {
                Ok(interval) => (url, Some(interval)),
                Err(_) => (s, None),
            },
            None => (s, None),
        };

        Ok(Self {
            url: url.to_string(),
            min_interval,
        })
    }
}

/// `ADDRESS;SIGNATURE[;ARG]...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSpec {
    pub target: Address,
    pub signature: String,
    pub args: Vec<String>,
}

impl CallSpec {
    pub fn to_call(&self) -> multicall::Result<Call> {
        let args = self.args.iter().map(String::as_str).collect::<Vec<_>>();
        Call::parse(self.target, &self.signature, &args)
    }
}

impl FromStr for CallSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(';').map(str::trim);
        let target = parts
            .next()
            .filter(|target| !target.is_empty())
            .ok_or_else(|| "missing call target".to_string())
            .and_then(parse_address)?;
        let signature = parts
            .next()
            .filter(|signature| !signature.is_empty())
            .ok_or_else(|| format!("missing signature in call `{s}`"))?
            .to_string();

        Ok(Self {
            target,
            signature,
            args: parts.map(str::to_string).collect(),
        })
    }
}

fn parse_address(s: &str) -> Result<Address, String> {
    s.parse::<Address>()
        .map_err(|err| format!("invalid address `{s}`: {err}"))
}
