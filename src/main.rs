use clap::Parser;
use radv::config::{self, Config};
use radv::dataplane::Reactor;
use radv::telemetry::init_logging;
use tracing::info;

#[derive(Parser)]
#[command(name = "radv")]
#[command(about = "IPv6 Router Advertisement daemon")]
struct Cli {
    /// Interface to advertise on
    #[arg(short = 'i', long = "interface", value_name = "IFNAME")]
    interface: String,

    /// Prefix to advertise for SLAAC (addr or addr/64), repeatable
    #[arg(short = 'a', value_name = "PREFIX")]
    prefixes: Vec<String>,

    /// Prefix to advertise for SLAAC and as on-link, repeatable
    #[arg(short = 'p', value_name = "PREFIX")]
    onlink_prefixes: Vec<String>,

    /// Router lifetime in seconds (0 = not a default router)
    #[arg(long = "default-lifetime", value_name = "SECONDS", default_value_t = 0)]
    default_lifetime: u16,

    /// Recursive DNS server to advertise, repeatable up to 3 times
    #[arg(long = "rdnss", value_name = "IP")]
    rdnss: Vec<String>,

    /// Prefix valid lifetime in seconds
    #[arg(
        long = "valid-lifetime",
        value_name = "SECONDS",
        default_value_t = config::DEFAULT_VALID_LIFETIME
    )]
    valid_lifetime: u32,

    /// Prefix preferred lifetime in seconds
    #[arg(
        long = "preferred-lifetime",
        value_name = "SECONDS",
        default_value_t = config::DEFAULT_PREFERRED_LIFETIME
    )]
    preferred_lifetime: u32,

    /// Maximum interval between unsolicited advertisements in seconds
    #[arg(
        long = "max-router-adv-interval",
        value_name = "SECONDS",
        default_value_t = config::DEFAULT_MAX_RTR_ADV_INTERVAL
    )]
    max_interval: u64,
}

fn main() {
    init_logging(None);

    // Usage errors exit 1, help and version exit 0
    let cli = Cli::try_parse().unwrap_or_else(|e| {
        let _ = e.print();
        std::process::exit(if e.use_stderr() { 1 } else { 0 });
    });

    let config = match build_config(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[ERROR] {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(config) {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn build_config(cli: Cli) -> radv::Result<Config> {
    let mut config = Config::new(cli.interface);
    config.default_lifetime = cli.default_lifetime;
    config.valid_lifetime = cli.valid_lifetime;
    config.preferred_lifetime = cli.preferred_lifetime;
    config.set_max_interval(cli.max_interval)?;

    for prefix in &cli.prefixes {
        config.add_prefix(prefix, false)?;
    }
    for prefix in &cli.onlink_prefixes {
        config.add_prefix(prefix, true)?;
    }
    for server in &cli.rdnss {
        config.add_rdnss(server)?;
    }

    config.validate()?;
    Ok(config)
}

fn run(config: Config) -> radv::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(radv::Error::Io)?;

    runtime.block_on(async move {
        let mut reactor = Reactor::new(config)?;
        info!("radv starting...");
        reactor.run().await
    })
}
