//! Program block types and languages

use serde::{Deserialize, Serialize};
use std::fmt;

/// Type of a program block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockType {
    Ob,
    Db,
    Sdb,
    Fc,
    Sfc,
    Fb,
    Sfb,
}

impl BlockType {
    /// ASCII code used when a block is named in a request
    pub fn ascii_code(&self) -> u8 {
        match self {
            BlockType::Ob => 0x38,
            BlockType::Db => 0x41,
            BlockType::Sdb => 0x42,
            BlockType::Fc => 0x43,
            BlockType::Sfc => 0x44,
            BlockType::Fb => 0x45,
            BlockType::Sfb => 0x46,
        }
    }

    /// Sub-block code used in block headers
    pub fn sub_block_code(&self) -> u8 {
        match self {
            BlockType::Ob => 0x08,
            BlockType::Db => 0x0A,
            BlockType::Sdb => 0x0B,
            BlockType::Fc => 0x0C,
            BlockType::Sfc => 0x0D,
            BlockType::Fb => 0x0E,
            BlockType::Sfb => 0x0F,
        }
    }

    pub fn from_sub_block_code(code: u8) -> Option<Self> {
        match code {
            0x08 => Some(BlockType::Ob),
            0x0A => Some(BlockType::Db),
            0x0B => Some(BlockType::Sdb),
            0x0C => Some(BlockType::Fc),
            0x0D => Some(BlockType::Sfc),
            0x0E => Some(BlockType::Fb),
            0x0F => Some(BlockType::Sfb),
            _ => None,
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BlockType::Ob => "OB",
            BlockType::Db => "DB",
            BlockType::Sdb => "SDB",
            BlockType::Fc => "FC",
            BlockType::Sfc => "SFC",
            BlockType::Fb => "FB",
            BlockType::Sfb => "SFB",
        };
        f.write_str(text)
    }
}

/// Language a block was written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockLanguage {
    Stl,
    Ladder,
    Fbd,
    Scl,
    Db,
    Graph,
    Sdb,
    Unknown(u8),
}

impl BlockLanguage {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => BlockLanguage::Stl,
            0x02 => BlockLanguage::Ladder,
            0x03 => BlockLanguage::Fbd,
            0x04 => BlockLanguage::Scl,
            0x05 => BlockLanguage::Db,
            0x06 => BlockLanguage::Graph,
            0x07 => BlockLanguage::Sdb,
            other => BlockLanguage::Unknown(other),
        }
    }
}
