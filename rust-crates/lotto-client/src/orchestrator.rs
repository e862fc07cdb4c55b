use crate::{
    config::ClientConfig,
    fetcher::{
        fetch_positions,
        fetch_winning_numbers,
    },
    ledger::{
        Address,
        EventSource,
        LedgerEvent,
        LotteryLedger,
        Wei,
    },
    numbers::{
        NUMBERS_PER_DRAW,
        TicketSelection,
    },
    purchase::{
        PurchaseRequest,
        prepare_purchase,
    },
    resolver::{
        DrawOutcome,
        PrizeResolver,
    },
    round::{
        RoundTransitionDetector,
        Transition,
    },
    ticket_cache::{
        SessionStorage,
        TicketCache,
    },
    winners::{
        WinnerHistory,
        WinnerRecord,
    },
};
use color_eyre::eyre::Result;
use std::time::Duration;
use tokio::{
    sync::{
        mpsc,
        oneshot,
    },
    time::{
        self,
        MissedTickBehavior,
    },
};
use tracing::{
    debug,
    info,
    trace,
    warn,
};


const HISTORY_SCAN_PACE: Duration = Duration::from_millis(250);

/// Point-in-time view of the contract, as shown to the player.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AggregateState {
    pub prize_pool: Wei,
    pub players: Vec<Address>,
    pub winning_positions: [u8; NUMBERS_PER_DRAW],
    pub draw_pending: bool,
    pub last_draw_timestamp: u64,
    pub has_bought: bool,
}

/// Everything that belongs to one player session.
pub struct SessionContext<S> {
    pub round: RoundTransitionDetector,
    pub tickets: TicketCache<S>,
    pub last_outcome: Option<DrawOutcome>,
}

impl<S: SessionStorage> SessionContext<S> {
    pub fn new(storage: S) -> Self {
        Self {
            round: RoundTransitionDetector::new(),
            tickets: TicketCache::new(storage),
            last_outcome: None,
        }
    }
}

/// A completed round whose ticket is not settled yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingRound {
    /// `lastDrawTimestamp` of the completed round.
    tag: u64,
    /// The ticket cached when the completion was seen.
    ticket: TicketSelection,
    /// Payouts for this round cannot be older than this block.
    since_block: u64,
}

#[derive(Debug)]
pub enum OrchestratorCommand {
    RefreshNow,
    PrepareTicket {
        selection: TicketSelection,
        reply: oneshot::Sender<Result<PurchaseRequest>>,
    },
    Shutdown,
}

#[derive(Debug, Clone)]
pub enum OrchestratorUpdate {
    State(AggregateState),
    Outcome(DrawOutcome),
    Winner(WinnerRecord),
    History(Vec<WinnerRecord>),
}

pub struct RefreshOrchestrator<L, E, S> {
    ledger: L,
    events: E,
    session: SessionContext<S>,
    resolver: PrizeResolver,
    winners: WinnerHistory,
    account: Address,
    contract: Address,
    stake: Wei,
    poll_interval: Duration,
    aggregate: Option<AggregateState>,
    pending_round: Option<PendingRound>,
    /// Block of the last refresh that saw a draw in progress.
    last_pending_block: Option<u64>,
    updates: mpsc::UnboundedSender<OrchestratorUpdate>,
}

impl<L, E, S> RefreshOrchestrator<L, E, S>
where
    L: LotteryLedger,
    E: EventSource,
    S: SessionStorage,
{
    pub fn new(
        config: &ClientConfig,
        ledger: L,
        events: E,
        storage: S,
        updates: mpsc::UnboundedSender<OrchestratorUpdate>,
    ) -> Self {
        Self {
            ledger,
            events,
            session: SessionContext::new(storage),
            resolver: PrizeResolver::new(config.win_threshold, config.prize_lookback_blocks),
            winners: WinnerHistory::starting_at(config.history_from_block),
            account: config.account,
            contract: config.contract_address,
            stake: config.ticket_stake,
            poll_interval: config.poll_interval,
            aggregate: None,
            pending_round: None,
            last_pending_block: None,
            updates,
        }
    }

    pub fn session(&self) -> &SessionContext<S> {
        &self.session
    }

    pub fn aggregate(&self) -> Option<&AggregateState> {
        self.aggregate.as_ref()
    }

    pub fn winners(&self) -> &WinnerHistory {
        &self.winners
    }

    /// Round tag of a completed round still waiting to be settled.
    pub fn pending_round(&self) -> Option<u64> {
        self.pending_round.map(|pending| pending.tag)
    }

    /// Reads the full aggregate state fresh from the ledger, every field at
    /// the same block. Returns that block with the state.
    pub async fn refresh(&self) -> Result<(u64, AggregateState)> {
        let block = self.ledger.latest_block().await?;
        let (prize_pool, players, winning_positions, draw_pending, last_draw_timestamp, has_bought) =
            futures::try_join!(
                self.ledger.prize_pool(block),
                self.ledger.players(block),
                fetch_positions(&self.ledger, block),
                self.ledger.draw_pending(block),
                self.ledger.last_draw_timestamp(block),
                self.ledger.has_player_bought(&self.account, block),
            )?;
        let state = AggregateState {
            prize_pool,
            players,
            winning_positions,
            draw_pending,
            last_draw_timestamp,
            has_bought,
        };
        Ok((block, state))
    }

    /// One refresh cycle. Polls and ledger events both end up here.
    pub async fn tick(&mut self) {
        let refreshed = self.refresh().await;
        let transition = self
            .session
            .round
            .observe_read(&refreshed.as_ref().map(|(_, state)| state.draw_pending));
        let (block, state) = match refreshed {
            Ok(refreshed) => refreshed,
            Err(err) => {
                warn!(?err, "refresh failed; holding last known state");
                return;
            }
        };
        debug!(
            block,
            pool = %state.prize_pool,
            players = state.players.len(),
            draw_pending = state.draw_pending,
            round = state.last_draw_timestamp,
            "refreshed"
        );
        if self.aggregate.as_ref() != Some(&state) {
            self.publish(OrchestratorUpdate::State(state.clone()));
        }
        let round = state.last_draw_timestamp;
        let draw_pending = state.draw_pending;
        self.aggregate = Some(state);

        match transition {
            Transition::DrawStarted => {
                if let Some(stale) = self.pending_round.take() {
                    warn!(
                        round = stale.tag,
                        "new draw started before the last one resolved; dropping its ticket"
                    );
                    self.drop_ticket(&stale.ticket);
                }
                info!("draw in progress");
            }
            Transition::DrawCompleted => info!(round, block, "draw completed"),
            Transition::None => trace!("no round transition"),
        }
        if self.session.round.take_completion() {
            self.begin_pending_round(round);
        }
        if draw_pending {
            self.last_pending_block = Some(block);
        }

        if let Some(pending) = self.pending_round {
            self.resolve_completed_round(pending, block, round).await;
        }
    }

    fn begin_pending_round(&mut self, round: u64) {
        let ticket = match self.session.tickets.load() {
            Ok(Some(ticket)) => ticket,
            Ok(None) => {
                info!(round, "no ticket cached for this session");
                return;
            }
            Err(err) => {
                warn!(?err, round, "failed to read cached ticket");
                return;
            }
        };
        let since_block = self.last_pending_block.map_or(0, |block| block + 1);
        debug!(round, %ticket, since_block, "awaiting settlement");
        self.pending_round = Some(PendingRound {
            tag: round,
            ticket,
            since_block,
        });
    }

    /// Settles the pending ticket once the numbers at `block` are fully
    /// revealed. `current_round` is the round tag read at that same block.
    async fn resolve_completed_round(
        &mut self,
        pending: PendingRound,
        block: u64,
        current_round: u64,
    ) {
        let round = pending.tag;
        if current_round != round {
            warn!(
                round,
                current_round, "round moved on before its numbers were readable; dropping ticket"
            );
            self.pending_round = None;
            self.drop_ticket(&pending.ticket);
            return;
        }
        let winning = match fetch_winning_numbers(&self.ledger, block).await {
            Ok(Some(winning)) => winning,
            Ok(None) => {
                debug!(round, block, "winning numbers not ready");
                return;
            }
            Err(err) => {
                warn!(?err, round, "failed to read winning numbers");
                return;
            }
        };
        self.pending_round = None;
        let outcome = self
            .resolver
            .resolve(
                &self.ledger,
                &self.account,
                pending.ticket,
                winning,
                pending.since_block,
                &mut self.session.tickets,
            )
            .await;

        info!(
            round,
            matched = outcome.matched_prefix_length,
            won = outcome.won,
            prize = %outcome.prize_amount,
            "draw outcome"
        );
        self.session.last_outcome = Some(outcome.clone());
        self.publish(OrchestratorUpdate::Outcome(outcome));
    }

    fn drop_ticket(&mut self, ticket: &TicketSelection) {
        match self.session.tickets.clear_resolved(ticket) {
            Ok(true) => debug!(%ticket, "cleared stale ticket"),
            Ok(false) => debug!(%ticket, "stale ticket already replaced"),
            Err(err) => warn!(?err, "failed to clear stale ticket"),
        }
    }

    pub async fn handle_event(&mut self, event: LedgerEvent, block: u64) {
        match &event {
            LedgerEvent::TicketPurchased { player } => {
                debug!(block, ?player, "ticket purchased");
            }
            LedgerEvent::WinningNumbersDrawn => debug!(block, "winning numbers drawn"),
            LedgerEvent::PrizePaid(log) => {
                if self.winners.record_live(&self.ledger, log).await {
                    info!(player = %log.player, amount = %log.amount, block, "prize paid");
                    if let Some(record) = self.winners.records().first() {
                        self.publish(OrchestratorUpdate::Winner(record.clone()));
                    }
                }
            }
        }
        self.tick().await;
    }

    /// Advances the winners scan by one chunk; publishes the list when done.
    pub async fn scan_history_step(&mut self) {
        match self.winners.scan_step(&self.ledger).await {
            Ok(true) => {
                self.publish(OrchestratorUpdate::History(self.winners.records().to_vec()));
            }
            Ok(false) => trace!("winner history scan continues"),
            Err(err) => warn!(?err, "winner history chunk failed; retrying"),
        }
    }

    pub fn prepare_purchase(&mut self, selection: TicketSelection) -> Result<PurchaseRequest> {
        prepare_purchase(selection, &mut self.session.tickets, self.contract, self.stake)
    }

    pub async fn run(
        &mut self,
        mut commands: mpsc::UnboundedReceiver<OrchestratorCommand>,
    ) -> Result<()> {
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut history_pace = time::interval(HISTORY_SCAN_PACE);
        history_pace.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                event = self.events.next_event() => match event {
                    Ok((event, block)) => self.handle_event(event, block).await,
                    Err(err) => warn!(?err, "event source failed"),
                },
                cmd = commands.recv() => match cmd {
                    Some(OrchestratorCommand::RefreshNow) => self.tick().await,
                    Some(OrchestratorCommand::PrepareTicket { selection, reply }) => {
                        let res = self.prepare_purchase(selection);
                        if reply.send(res).is_err() {
                            debug!("purchase requester went away");
                        }
                    }
                    Some(OrchestratorCommand::Shutdown) | None => {
                        info!("orchestrator stopping");
                        break;
                    }
                },
                _ = history_pace.tick(), if !self.winners.is_complete() => {
                    self.scan_history_step().await
                }
            }
        }
        Ok(())
    }

    fn publish(&self, update: OrchestratorUpdate) {
        if self.updates.send(update).is_err() {
            trace!("no update listener");
        }
    }
}
