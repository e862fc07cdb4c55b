use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    str::FromStr,
};

pub mod bindings;
pub mod json_rpc;

const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;
const ETHER_DECIMALS: u32 = 18;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 20]);

impl Address {
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// `0x1234…abcd`
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}…{}", &full[..6], &full[full.len() - 4..])
    }
}

impl FromStr for Address {
    type Err = color_eyre::eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = decode_hex(s).wrap_err_with(|| format!("invalid address '{s}'"))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| eyre!("address '{s}' has {} bytes, expected 20", b.len()))?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for Address {
    type Error = color_eyre::eyre::Report;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash([u8; 32]);

impl TxHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// `0x12345678…`
    pub fn short(&self) -> String {
        format!("{}…", &self.to_string()[..10])
    }
}

impl FromStr for TxHash {
    type Err = color_eyre::eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = decode_hex(s).wrap_err_with(|| format!("invalid tx hash '{s}'"))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| eyre!("tx hash '{s}' has {} bytes, expected 32", b.len()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Native currency amount in wei.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Wei(pub u128);

impl Wei {
    pub const ZERO: Wei = Wei(0);

    /// Ether rounded half-up to `decimals` places, e.g. `0.0500`.
    pub fn format_ether_fixed(&self, decimals: u32) -> String {
        let decimals = decimals.min(ETHER_DECIMALS);
        let scale = 10u128.pow(ETHER_DECIMALS - decimals);
        let rounded = self.0 / scale + u128::from(self.0 % scale >= scale / 2 && scale > 1);
        let unit = 10u128.pow(decimals);
        if decimals == 0 {
            return rounded.to_string();
        }
        format!(
            "{}.{:0width$}",
            rounded / unit,
            rounded % unit,
            width = decimals as usize
        )
    }
}

/// Ether with trailing zeros trimmed, e.g. `0.05` or `1.0`.
impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / WEI_PER_ETHER;
        let frac = format!("{:018}", self.0 % WEI_PER_ETHER);
        let frac = frac.trim_end_matches('0');
        let frac = if frac.is_empty() { "0" } else { frac };
        write!(f, "{whole}.{frac}")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrizePaidLog {
    pub player: Address,
    pub amount: Wei,
    pub match_count: u8,
    pub tx_hash: Option<TxHash>,
    pub block_number: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerEvent {
    TicketPurchased { player: Option<Address> },
    WinningNumbersDrawn,
    PrizePaid(PrizePaidLog),
}

/// Read side of the lottery contract and the chain it lives on.
///
/// Contract reads take the block they are evaluated at, so everything read
/// for one refresh describes a single chain state.
pub trait LotteryLedger {
    fn prize_pool(&self, block: u64) -> impl Future<Output = Result<Wei>>;

    fn players(&self, block: u64) -> impl Future<Output = Result<Vec<Address>>>;

    fn draw_pending(&self, block: u64) -> impl Future<Output = Result<bool>>;

    fn last_draw_timestamp(&self, block: u64) -> impl Future<Output = Result<u64>>;

    /// One slot of the revealed numbers; zero until that slot is written.
    fn last_winning_number(
        &self,
        position: usize,
        block: u64,
    ) -> impl Future<Output = Result<u8>>;

    fn has_player_bought(
        &self,
        account: &Address,
        block: u64,
    ) -> impl Future<Output = Result<bool>>;

    fn latest_block(&self) -> impl Future<Output = Result<u64>>;

    /// Unix seconds of the given block.
    fn block_timestamp(&self, block: u64) -> impl Future<Output = Result<u64>>;

    /// `PrizePaid` logs in `[from_block, to_block]`, optionally filtered by the
    /// indexed player.
    fn prize_paid_logs(
        &self,
        player: Option<&Address>,
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = Result<Vec<PrizePaidLog>>>;
}

/// Best-effort notifications; yields each event with its block number.
pub trait EventSource {
    fn next_event(&mut self) -> impl Future<Output = Result<(LedgerEvent, u64)>>;
}

pub(crate) fn decode_hex(raw: &str) -> Result<Vec<u8>> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.len() % 2 == 1 {
        return Ok(hex::decode(format!("0{digits}"))?);
    }
    Ok(hex::decode(digits)?)
}
