pub mod eth;
pub mod ws;
