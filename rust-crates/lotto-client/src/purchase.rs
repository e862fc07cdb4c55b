use crate::{
    ledger::{
        Address,
        Wei,
        bindings::Lottery,
    },
    numbers::TicketSelection,
    ticket_cache::{
        SessionStorage,
        TicketCache,
    },
};
use alloy::sol_types::SolCall;
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use tracing::info;

/// 0.01 ether.
pub const DEFAULT_TICKET_STAKE: Wei = Wei(10_000_000_000_000_000);

/// An unsigned `buyTicket` transaction, ready to hand to a wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRequest {
    pub contract: Address,
    pub numbers: TicketSelection,
    pub calldata: Vec<u8>,
    pub value: Wei,
}

impl PurchaseRequest {
    pub fn calldata_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.calldata))
    }
}

/// Remembers the ticket before it leaves the client so the result of the
/// draw can be matched back to it.
pub fn prepare_purchase<S: SessionStorage>(
    selection: TicketSelection,
    cache: &mut TicketCache<S>,
    contract: Address,
    stake: Wei,
) -> Result<PurchaseRequest> {
    cache
        .save(&selection)
        .wrap_err("saving ticket before purchase")?;
    let calldata = Lottery::buyTicketCall {
        numbers: *selection.numbers(),
    }
    .abi_encode();
    info!(%selection, %contract, value = %stake, "prepared ticket purchase");
    Ok(PurchaseRequest {
        contract,
        numbers: selection,
        calldata,
        value: stake,
    })
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::ticket_cache::InMemorySessionStorage;

    #[test]
    fn prepare_purchase__valid_selection__caches_and_encodes() {
        // given
        let mut cache = TicketCache::new(InMemorySessionStorage::new());
        let selection = TicketSelection::new(&[44, 3, 7, 12, 19, 25, 31]).unwrap();
        let contract = Address::new([0x11; 20]);

        // when
        let request =
            prepare_purchase(selection, &mut cache, contract, DEFAULT_TICKET_STAKE).unwrap();

        // then
        assert_eq!(cache.load().unwrap(), Some(selection));
        assert_eq!(request.value, DEFAULT_TICKET_STAKE);
        assert_eq!(request.calldata.len(), 4 + 7 * 32);
        assert_eq!(request.calldata[..4], Lottery::buyTicketCall::SELECTOR);
        assert_eq!(request.calldata[4 + 31], 3);
        assert_eq!(request.calldata[4 + 6 * 32 + 31], 44);
        assert!(request.calldata_hex().starts_with("0x"));
    }

    #[test]
    fn prepare_purchase__second_ticket__replaces_cached_one() {
        // given
        let mut cache = TicketCache::new(InMemorySessionStorage::new());
        let contract = Address::new([0x11; 20]);
        let first = TicketSelection::new(&[1, 2, 3, 4, 5, 6, 7]).unwrap();
        let second = TicketSelection::new(&[8, 9, 10, 11, 12, 13, 14]).unwrap();
        prepare_purchase(first, &mut cache, contract, DEFAULT_TICKET_STAKE).unwrap();

        // when
        prepare_purchase(second, &mut cache, contract, DEFAULT_TICKET_STAKE).unwrap();

        // then
        assert_eq!(cache.load().unwrap(), Some(second));
    }
}
