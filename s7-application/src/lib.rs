//! Application layer for the S7 protocol
//!
//! Pure encoders and decoders: the S7 PDU envelope, setup communication,
//! variable read/write items, request splitting and reassembly, PLC control
//! and the userdata services (clock, block info, system status list).
//! Nothing in this crate performs I/O.

pub mod block_info;
pub mod control;
pub mod item;
pub mod pdu;
pub mod setup;
pub mod splitter;
pub mod userdata;

pub use block_info::BlockInfo;
pub use control::PlcControl;
pub use item::DataItem;
pub use pdu::{MessageType, Pdu};
pub use setup::SetupCommunication;
pub use splitter::{Fragment, ReadAssembler, RequestPlan, WriteAssembler};
pub use userdata::{UserDataRequest, UserDataResponse};
