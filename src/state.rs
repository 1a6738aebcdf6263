use std::collections::HashSet;
use std::sync::Arc;

use crate::config::BotConfig;
use crate::events::sequencer::ChatSequencer;
use crate::receipts::cancel::InFlight;
use crate::receipts::notes::NoteAttacher;
use crate::receipts::ReceiptPipeline;
use crate::routing::RoutingTable;
use crate::tracking::sweep::RetentionSweeper;
use crate::tracking::TrackingStore;

pub struct AppState {
    pub pipeline: ReceiptPipeline,
    pub notes: NoteAttacher,
    pub store: Arc<dyn TrackingStore>,
    pub sweeper: RetentionSweeper,
    pub routes: Arc<RoutingTable>,
    pub admin_ids: HashSet<u64>,
    /// Keeps units of one chat in arrival order.
    pub sequencer: ChatSequencer,
    pub in_flight: InFlight,
    pub config: Arc<BotConfig>,
}

impl AppState {
    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

pub type Context<'a> = poise::Context<'a, AppState, anyhow::Error>;
