//! Value types exchanged with the controller

pub mod block;
pub mod plc_date_time;
pub mod plc_status;

pub use block::{BlockLanguage, BlockType};
pub use plc_date_time::PlcDateTime;
pub use plc_status::PlcStatus;
