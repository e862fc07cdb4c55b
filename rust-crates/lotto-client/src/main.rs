use clap::{
    ArgGroup,
    Parser,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::{
    DeploymentEnv,
    DeploymentStore,
    record_deployment,
};
use lotto_client::{
    config::ClientConfig,
    ledger::{
        Address,
        LotteryLedger,
        Wei,
        json_rpc::{
            JsonRpcLedger,
            LogPollingEventSource,
        },
    },
    numbers::TicketSelection,
    orchestrator::{
        OrchestratorCommand,
        OrchestratorUpdate,
        RefreshOrchestrator,
    },
    resolver::PrizeSource,
    ticket_cache::InMemorySessionStorage,
};
use std::{
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};
use tokio::sync::{
    mpsc,
    oneshot,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
};
use url::Url;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Watch a lottery contract and report how your ticket did",
    long_about = None,
    group(
        ArgGroup::new("network")
            .args(["sepolia", "local"])
            .required(true)
    )
)]
struct Args {
    #[arg(long)]
    sepolia: bool,

    #[arg(long)]
    local: bool,

    /// Overrides the RPC URL from the deployment record.
    #[arg(long)]
    rpc_url: Option<Url>,

    #[arg(short, long)]
    contract_address: Option<String>,

    /// Account whose ticket is tracked.
    #[arg(short, long)]
    account: String,

    /// First block of the winners history scan.
    #[arg(long = "start-block")]
    start_block: Option<u64>,

    #[arg(long, default_value_t = 4_000)]
    poll_interval_ms: u64,

    #[arg(long)]
    win_threshold: Option<u8>,

    #[arg(long)]
    lookback_blocks: Option<u64>,

    /// Stake sent with `buyTicket`, in wei.
    #[arg(long)]
    stake_wei: Option<u128>,

    /// Seven numbers, e.g. `--ticket 3,7,12,19,25,31,44`.
    #[arg(long, value_delimiter = ',', num_args = 1.., conflicts_with = "quick_pick")]
    ticket: Option<Vec<u32>>,

    #[arg(long)]
    quick_pick: bool,

    /// Remembers the contract and RPC URL for later runs on this network.
    #[arg(long)]
    save_deployment: bool,

    #[arg(short, long, default_value = "false")]
    tracing: bool,

    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(rolling::daily(dir, "lotto-watch.log"));
            let _ = fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .try_init();
            Some(guard)
        }
        None => {
            let _ = fmt().with_env_filter(filter).try_init();
            None
        }
    }
}

async fn handle_interupt() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received interrupt, exiting"),
        Err(err) => tracing::warn!(?err, "Received interrupt error, exiting anyway"),
    }
}

fn network_env(args: &Args) -> DeploymentEnv {
    if args.sepolia {
        DeploymentEnv::Sepolia
    } else {
        DeploymentEnv::Local
    }
}

fn load_config(args: &Args, store: &DeploymentStore) -> Result<ClientConfig> {
    let env = network_env(args);
    let record = store
        .load()
        .map_err(|err| eyre!("loading {env} deployment: {err:#}"))?;

    let contract_address: Address = match (&args.contract_address, &record) {
        (Some(raw), _) => raw.parse().wrap_err("parsing --contract-address")?,
        (None, Some(record)) => record
            .contract_address
            .parse()
            .wrap_err("parsing contract address from deployment record")?,
        (None, None) => {
            return Err(eyre!(
                "No deployment record found for {env}; provide --contract-address"
            ));
        }
    };
    let rpc_url = match (&args.rpc_url, &record) {
        (Some(url), _) => url.clone(),
        (None, Some(record)) => Url::parse(&record.network_url)
            .wrap_err("parsing network URL from deployment record")?,
        (None, None) => Url::parse(env.default_rpc_url())?,
    };
    let account: Address = args.account.parse().wrap_err("parsing --account")?;

    let mut config = ClientConfig::new(rpc_url, contract_address, account);
    config.poll_interval = Duration::from_millis(args.poll_interval_ms);
    config.history_from_block = args
        .start_block
        .or(record.as_ref().map(|r| r.history_start_block()));
    if let Some(threshold) = args.win_threshold {
        config.win_threshold = threshold;
    }
    if let Some(blocks) = args.lookback_blocks {
        config.prize_lookback_blocks = blocks;
    }
    if let Some(stake) = args.stake_wei {
        config.ticket_stake = Wei(stake);
    }
    if let Some(record) = &record {
        tracing::info!(
            contract = %record.contract_address,
            network = %record.network_url,
            deployed_at = %record.deployed_at,
            block = ?record.deployment_block_height,
            "Using deployment record"
        );
    }
    Ok(config)
}

async fn save_deployment(
    store: &DeploymentStore,
    ledger: &JsonRpcLedger,
    config: &ClientConfig,
) -> Result<()> {
    let (chain_id, head) = tokio::try_join!(ledger.chain_id(), ledger.latest_block())?;
    let record = record_deployment(
        store,
        config.contract_address.to_string(),
        config.rpc_url.as_str(),
        Some(chain_id),
        None::<&str>,
        None::<&str>,
        Some(config.history_from_block.unwrap_or(head)),
    )
    .map_err(|err| eyre!("saving deployment record: {err:#}"))?;
    tracing::info!(
        path = %store.path().display(),
        contract = %record.contract_address,
        chain_id,
        "Saved deployment record"
    );
    Ok(())
}

fn ticket_from_args(args: &Args) -> Result<Option<TicketSelection>> {
    if args.quick_pick {
        return Ok(Some(TicketSelection::quick_pick(&mut rand::rng())));
    }
    args.ticket
        .as_deref()
        .map(TicketSelection::new)
        .transpose()
        .wrap_err("invalid --ticket")
}

fn print_update(update: &OrchestratorUpdate) {
    match update {
        OrchestratorUpdate::State(state) => println!(
            "pool {} ETH | {} players | draw pending: {} | last numbers {:?}{}",
            state.prize_pool,
            state.players.len(),
            state.draw_pending,
            state.winning_positions,
            if state.has_bought { " | you are in this draw" } else { "" },
        ),
        OrchestratorUpdate::Outcome(outcome) => {
            println!(
                "draw {} vs your {}: {} in a row",
                outcome.winning_numbers, outcome.player_numbers, outcome.matched_prefix_length
            );
            match (&outcome.source, outcome.won) {
                (PrizeSource::PayoutEvent { .. }, _) => {
                    println!("you won {} ETH", outcome.prize_amount)
                }
                (PrizeSource::Estimated, true) => {
                    println!("you likely won; payout amount not confirmed yet")
                }
                _ => println!("no prize this round"),
            }
        }
        OrchestratorUpdate::Winner(record) => println!(
            "winner {} took {} with {} matched ({})",
            record.short_player(),
            record.amount_display(),
            record.matched_prefix_length,
            record.time_display()
        ),
        OrchestratorUpdate::History(records) => {
            println!("{} previous winners", records.len());
            for record in records {
                println!(
                    "  {} {} {} matched {}",
                    record.time_display(),
                    record.short_player(),
                    record.amount_display(),
                    record.matched_prefix_length
                );
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let _guard = if args.tracing {
        init_tracing(args.log_dir.as_deref())
    } else {
        None
    };
    let store = DeploymentStore::new(network_env(&args));
    let config = load_config(&args, &store)?;
    let selection = ticket_from_args(&args)?;

    let ledger = JsonRpcLedger::new(config.rpc_url.clone(), config.contract_address)?;
    if args.save_deployment {
        save_deployment(&store, &ledger, &config).await?;
    }
    tracing::info!(%ledger, account = %config.account, "Watching lottery");
    let events = LogPollingEventSource::new(ledger.clone(), config.poll_interval);
    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let mut orchestrator = RefreshOrchestrator::new(
        &config,
        ledger,
        events,
        InMemorySessionStorage::new(),
        updates_tx,
    );

    let controller = async {
        if let Some(selection) = selection {
            let (reply, response) = oneshot::channel();
            cmd_tx
                .send(OrchestratorCommand::PrepareTicket { selection, reply })
                .map_err(|_| eyre!("orchestrator stopped"))?;
            let request = response.await.map_err(|_| eyre!("orchestrator stopped"))??;
            println!(
                "ticket {} ready: send {} ETH to {} with data {}",
                request.numbers,
                request.value,
                request.contract,
                request.calldata_hex()
            );
        }
        handle_interupt().await;
        let _ = cmd_tx.send(OrchestratorCommand::Shutdown);
        Ok::<_, color_eyre::eyre::Report>(())
    };
    let session = async {
        let (run, control) = tokio::join!(orchestrator.run(cmd_rx), controller);
        run.and(control)
    };
    let printer = async {
        while let Some(update) = updates_rx.recv().await {
            print_update(&update);
        }
    };

    let res = tokio::select! {
        res = session => res,
        _ = printer => Ok(()),
    };
    for update in drain_queued(&mut updates_rx) {
        print_update(&update);
    }
    res
}

/// Updates still queued when the session ends, such as a final outcome.
fn drain_queued(
    updates: &mut mpsc::UnboundedReceiver<OrchestratorUpdate>,
) -> Vec<OrchestratorUpdate> {
    std::iter::from_fn(|| updates.try_recv().ok()).collect()
}
