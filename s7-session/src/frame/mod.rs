//! ISO-on-TCP frames: TPKT envelope and COTP TPDUs

pub mod cotp;
pub mod tpkt;
