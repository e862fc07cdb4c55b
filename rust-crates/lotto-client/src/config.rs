use crate::{
    ledger::{
        Address,
        Wei,
    },
    numbers::DEFAULT_WIN_THRESHOLD,
    purchase::DEFAULT_TICKET_STAKE,
    resolver::DEFAULT_PRIZE_LOOKBACK_BLOCKS,
};
use std::time::Duration;
use url::Url;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub rpc_url: Url,
    pub contract_address: Address,
    /// The player whose ticket is tracked.
    pub account: Address,
    pub poll_interval: Duration,
    pub win_threshold: u8,
    pub prize_lookback_blocks: u64,
    /// First block of the winners scan; `None` scans a recent window only.
    pub history_from_block: Option<u64>,
    pub ticket_stake: Wei,
}

impl ClientConfig {
    pub fn new(rpc_url: Url, contract_address: Address, account: Address) -> Self {
        Self {
            rpc_url,
            contract_address,
            account,
            poll_interval: DEFAULT_POLL_INTERVAL,
            win_threshold: DEFAULT_WIN_THRESHOLD,
            prize_lookback_blocks: DEFAULT_PRIZE_LOOKBACK_BLOCKS,
            history_from_block: None,
            ticket_stake: DEFAULT_TICKET_STAKE,
        }
    }
}
