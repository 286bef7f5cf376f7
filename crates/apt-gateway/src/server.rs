//! The shared server state every handler closes over, per the design note
//! that global mutable state in the reference implementation becomes a
//! single owned value passed by reference (here, by `Arc`) to handlers.

use std::sync::Arc;
use std::time::Duration;

use apt_modes::Inventory;
use apt_service::TranslationService;

pub struct Server {
    pub service: TranslationService,
    pub inventory: Inventory,
    pub page_fetch_timeout: Duration,
}

pub type SharedServer = Arc<Server>;
