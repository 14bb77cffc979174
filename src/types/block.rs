use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: String,
    pub number: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txids: Vec<String>,
}

impl Block {
    pub fn new(header: BlockHeader, txids: Vec<String>) -> Self {
        Self { header, txids }
    }

    pub fn hash(&self) -> &str {
        &self.header.hash
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }
}

/// A block is addressed either by its hash or by its height.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockId {
    Hash(String),
    Number(u64),
}

impl From<u64> for BlockId {
    fn from(number: u64) -> Self {
        BlockId::Number(number)
    }
}

impl From<&str> for BlockId {
    fn from(hash: &str) -> Self {
        BlockId::Hash(hash.to_string())
    }
}

impl From<String> for BlockId {
    fn from(hash: String) -> Self {
        BlockId::Hash(hash)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockId::Hash(hash) => write!(f, "{hash}"),
            BlockId::Number(number) => write!(f, "{number}"),
        }
    }
}
