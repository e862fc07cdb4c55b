use super::{
    Address,
    EventSource,
    LedgerEvent,
    LotteryLedger,
    PrizePaidLog,
    TxHash,
    Wei,
    bindings::Lottery,
};
use alloy::{
    network::TransactionBuilder,
    primitives::{
        self,
        B256,
        Bytes,
        U256,
    },
    providers::{
        Provider,
        RootProvider,
    },
    rpc::{
        client::RpcClient,
        types::{
            BlockId,
            BlockNumberOrTag,
            Filter,
            Log,
            TransactionRequest,
        },
    },
    sol_types::{
        SolCall,
        SolEvent,
    },
    transports::http::Http,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use std::{
    collections::VecDeque,
    fmt,
    time::Duration,
};
use tokio::time::{
    self,
    Interval,
    MissedTickBehavior,
};
use tracing::{
    debug,
    trace,
    warn,
};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// The lottery contract over an HTTP JSON-RPC endpoint.
#[derive(Clone)]
pub struct JsonRpcLedger {
    url: Url,
    contract: Address,
    provider: RootProvider,
}

impl JsonRpcLedger {
    pub fn new(url: Url, contract: Address) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .wrap_err("failed to build HTTP client for JSON-RPC")?;
        let transport = Http::with_client(http, url.clone());
        let provider = RootProvider::new(RpcClient::new(transport, false));
        Ok(Self {
            url,
            contract,
            provider,
        })
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub async fn chain_id(&self) -> Result<u64> {
        self.provider
            .get_chain_id()
            .await
            .wrap_err("reading chain id")
    }

    /// `eth_call` of `call` against the contract state at `block`.
    async fn call<C: SolCall>(&self, call: C, block: u64) -> Result<C::Return> {
        let tx = TransactionRequest::default()
            .with_to(self.contract.into())
            .with_input(call.abi_encode());
        let raw: Bytes = self
            .provider
            .call(tx)
            .block(BlockId::number(block))
            .await
            .wrap_err_with(|| format!("calling {} at block {block}", C::SIGNATURE))?;
        decode_return::<C>(&raw)
    }

    fn contract_filter(&self, from_block: u64, to_block: u64) -> Filter {
        Filter::new()
            .address(primitives::Address::from(self.contract))
            .from_block(from_block)
            .to_block(to_block)
    }

    /// Every lottery event in `[from_block, to_block]`.
    pub(crate) async fn contract_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>> {
        let filter = self.contract_filter(from_block, to_block).event_signature(vec![
            Lottery::TicketPurchased::SIGNATURE_HASH,
            Lottery::WinningNumbersDrawn::SIGNATURE_HASH,
            Lottery::PrizePaid::SIGNATURE_HASH,
        ]);
        self.provider
            .get_logs(&filter)
            .await
            .wrap_err_with(|| format!("fetching contract logs {from_block}..={to_block}"))
    }
}

impl LotteryLedger for JsonRpcLedger {
    async fn prize_pool(&self, block: u64) -> Result<Wei> {
        let pool = self.call(Lottery::prizePoolCall {}, block).await?;
        Ok(Wei(u256_to_u128(pool).wrap_err("prizePool()")?))
    }

    async fn players(&self, block: u64) -> Result<Vec<Address>> {
        let players = self.call(Lottery::getPlayersCall {}, block).await?;
        Ok(players.into_iter().map(Address::from).collect())
    }

    async fn draw_pending(&self, block: u64) -> Result<bool> {
        self.call(Lottery::drawPendingCall {}, block).await
    }

    async fn last_draw_timestamp(&self, block: u64) -> Result<u64> {
        let timestamp = self.call(Lottery::lastDrawTimestampCall {}, block).await?;
        u64::try_from(timestamp).map_err(|_| eyre!("lastDrawTimestamp() {timestamp} exceeds u64"))
    }

    async fn last_winning_number(&self, position: usize, block: u64) -> Result<u8> {
        let index = U256::from(position);
        self.call(Lottery::lastWinningNumbersCall { index }, block)
            .await
    }

    async fn has_player_bought(&self, account: &Address, block: u64) -> Result<bool> {
        let player = primitives::Address::from(*account);
        self.call(Lottery::hasPlayerBoughtCall { player }, block)
            .await
    }

    async fn latest_block(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .wrap_err("reading latest block number")
    }

    async fn block_timestamp(&self, block: u64) -> Result<u64> {
        let found = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(block))
            .await
            .wrap_err_with(|| format!("fetching block {block}"))?;
        let found = found.ok_or_else(|| eyre!("block {block} not found"))?;
        Ok(found.header.timestamp)
    }

    async fn prize_paid_logs(
        &self,
        player: Option<&Address>,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<PrizePaidLog>> {
        let mut filter = self
            .contract_filter(from_block, to_block)
            .event_signature(Lottery::PrizePaid::SIGNATURE_HASH);
        if let Some(player) = player {
            filter = filter.topic1(primitives::Address::from(*player).into_word());
        }
        debug!(from_block, to_block, "fetching PrizePaid logs");
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .wrap_err_with(|| format!("fetching PrizePaid logs {from_block}..={to_block}"))?;
        let mut decoded = Vec::with_capacity(logs.len());
        for log in logs.iter().filter(|log| !log.removed) {
            match decode_prize_paid(log) {
                Ok(paid) => decoded.push(paid),
                Err(err) => warn!(?err, "skipping undecodable PrizePaid log"),
            }
        }
        Ok(decoded)
    }
}

impl fmt::Display for JsonRpcLedger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} @ {}", self.contract, self.url)
    }
}

/// Watches the contract by polling `eth_getLogs` from a moving block cursor.
pub struct LogPollingEventSource {
    ledger: JsonRpcLedger,
    poll_interval: Duration,
    ticker: Option<Interval>,
    cursor: Option<u64>,
    buffered: VecDeque<(LedgerEvent, u64)>,
}

impl LogPollingEventSource {
    /// Starts from the chain head at the first poll.
    pub fn new(ledger: JsonRpcLedger, poll_interval: Duration) -> Self {
        Self {
            ledger,
            poll_interval,
            ticker: None,
            cursor: None,
            buffered: VecDeque::new(),
        }
    }

    pub fn starting_at(mut self, block: u64) -> Self {
        self.cursor = Some(block);
        self
    }

    async fn poll_once(&mut self) -> Result<()> {
        let latest = self.ledger.latest_block().await?;
        let from = self.cursor.unwrap_or(latest);
        if from > latest {
            return Ok(());
        }
        let logs = self.ledger.contract_logs(from, latest).await?;
        self.cursor = Some(latest + 1);
        for log in logs.iter().filter(|log| !log.removed) {
            match decode_log(log) {
                Ok(Some(event)) => self.buffered.push_back(event),
                Ok(None) => trace!(topics = ?log.topics(), "ignoring unrelated log"),
                Err(err) => warn!(?err, "skipping undecodable contract log"),
            }
        }
        Ok(())
    }
}

impl EventSource for LogPollingEventSource {
    async fn next_event(&mut self) -> Result<(LedgerEvent, u64)> {
        loop {
            if let Some(event) = self.buffered.pop_front() {
                return Ok(event);
            }
            let poll_interval = self.poll_interval;
            let ticker = self.ticker.get_or_insert_with(|| {
                let mut ticker = time::interval(poll_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker
            });
            ticker.tick().await;
            self.poll_once().await?;
        }
    }
}

pub(crate) fn decode_return<C: SolCall>(raw: &[u8]) -> Result<C::Return> {
    C::abi_decode_returns(raw).wrap_err_with(|| format!("decoding {} return data", C::SIGNATURE))
}

fn u256_to_u128(value: U256) -> Result<u128> {
    u128::try_from(value).map_err(|_| eyre!("{value} exceeds u128"))
}

pub(crate) fn decode_log(log: &Log) -> Result<Option<(LedgerEvent, u64)>> {
    let block = log.block_number.unwrap_or_default();
    let Some(&topic0) = log.topic0() else {
        return Ok(None);
    };
    let event = if topic0 == Lottery::PrizePaid::SIGNATURE_HASH {
        LedgerEvent::PrizePaid(decode_prize_paid(log)?)
    } else if topic0 == Lottery::WinningNumbersDrawn::SIGNATURE_HASH {
        LedgerEvent::WinningNumbersDrawn
    } else if topic0 == Lottery::TicketPurchased::SIGNATURE_HASH {
        LedgerEvent::TicketPurchased {
            player: ticket_buyer(log),
        }
    } else {
        return Ok(None);
    };
    Ok(Some((event, block)))
}

/// Deployments differ on whether the buyer is indexed; take whichever is there.
fn ticket_buyer(log: &Log) -> Option<Address> {
    let word = match log.topics().get(1) {
        Some(topic) => *topic,
        None => B256::from_slice(log.data().data.get(..32)?),
    };
    Some(primitives::Address::from_word(word).into())
}

pub(crate) fn decode_prize_paid(log: &Log) -> Result<PrizePaidLog> {
    let decoded = log
        .log_decode::<Lottery::PrizePaid>()
        .wrap_err("decoding PrizePaid log")?;
    let paid = decoded.inner.data;
    Ok(PrizePaidLog {
        player: paid.player.into(),
        amount: Wei(u256_to_u128(paid.amount).wrap_err("PrizePaid amount")?),
        match_count: paid.matchCount,
        tx_hash: log.transaction_hash.map(TxHash::from),
        block_number: log.block_number.unwrap_or_default(),
    })
}
