//! Blocking facade over [`S7Connection`]
//!
//! Owns a small runtime so callers without an async context can use the
//! client. The driver task keeps running on the runtime's worker between
//! calls. Must not be used from inside another Tokio runtime.

use super::connection::Connection;
use super::{ConnectionConfig, S7Connection};
use bytes::Bytes;
use s7_application::BlockInfo;
use s7_core::{AddressingDescriptor, BlockType, PlcDateTime, PlcStatus, S7Error, S7Result};
use s7_session::{ConnectionState, SessionStatistics};
use tokio::runtime::{Builder, Runtime};

#[derive(Debug)]
pub struct BlockingConnection {
    runtime: Runtime,
    inner: S7Connection,
}

impl BlockingConnection {
    pub fn new(inner: S7Connection) -> S7Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("s7-client")
            .enable_all()
            .build()
            .map_err(S7Error::from)?;
        Ok(Self { runtime, inner })
    }

    pub fn from_config(config: ConnectionConfig) -> S7Result<Self> {
        Self::new(S7Connection::from_config(config)?)
    }

    pub fn inner(&self) -> &S7Connection {
        &self.inner
    }

    pub fn connect(&self) -> S7Result<()> {
        self.runtime.block_on(self.inner.connect())
    }

    pub fn disconnect(&self) -> S7Result<()> {
        self.runtime.block_on(self.inner.disconnect())
    }

    pub fn is_ready(&self) -> bool {
        self.inner.is_ready()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn read(&self, descriptors: &[AddressingDescriptor]) -> S7Result<Vec<S7Result<Bytes>>> {
        self.runtime.block_on(self.inner.read(descriptors))
    }

    pub fn write(&self, items: &[(AddressingDescriptor, Bytes)]) -> S7Result<Vec<S7Result<()>>> {
        self.runtime.block_on(self.inner.write(items))
    }

    pub fn read_block_info(&self, block_type: BlockType, number: u16) -> S7Result<BlockInfo> {
        self.runtime.block_on(self.inner.read_block_info(block_type, number))
    }

    pub fn get_plc_time(&self) -> S7Result<PlcDateTime> {
        self.runtime.block_on(self.inner.get_plc_time())
    }

    pub fn set_plc_time(&self, time: &PlcDateTime) -> S7Result<()> {
        self.runtime.block_on(self.inner.set_plc_time(time))
    }

    pub fn get_plc_status(&self) -> S7Result<PlcStatus> {
        self.runtime.block_on(self.inner.get_plc_status())
    }

    pub fn start_plc(&self, cold: bool) -> S7Result<()> {
        self.runtime.block_on(self.inner.start_plc(cold))
    }

    pub fn stop_plc(&self) -> S7Result<()> {
        self.runtime.block_on(self.inner.stop_plc())
    }

    pub fn copy_ram_to_rom(&self) -> S7Result<()> {
        self.runtime.block_on(self.inner.copy_ram_to_rom())
    }

    pub fn compress_memory(&self) -> S7Result<()> {
        self.runtime.block_on(self.inner.compress_memory())
    }

    pub fn statistics(&self) -> SessionStatistics {
        self.inner.statistics()
    }
}

impl Drop for BlockingConnection {
    fn drop(&mut self) {
        if self.inner.state() != ConnectionState::Disconnected {
            if let Err(e) = self.runtime.block_on(self.inner.disconnect()) {
                log::debug!("Disconnect on drop failed: {}", e);
            }
        }
    }
}
