// Typed decoding of destination-contract revert data

use std::fmt;

use ethers::types::Bytes;
use ethers::utils::id;

/// Raw revert payload returned by `eth_call` / `eth_estimateGas`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertData(pub Bytes);

impl RevertData {
    pub fn selector(&self) -> Option<[u8; 4]> {
        let bytes = self.0.as_ref();
        if bytes.len() < 4 {
            return None;
        }
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&bytes[..4]);
        Some(selector)
    }

    /// The terminal error this revert encodes, if any.
    pub fn terminal(&self) -> Option<TerminalRevert> {
        self.selector().and_then(TerminalRevert::from_selector)
    }
}

impl fmt::Display for RevertData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.terminal() {
            Some(terminal) => write!(f, "{}", terminal.signature()),
            None => match self.selector() {
                Some(selector) => write!(f, "selector 0x{}", hex::encode(selector)),
                None => write!(f, "empty revert data"),
            },
        }
    }
}

/// Custom errors that mean the bounty has moved on and retrying is pointless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalRevert {
    BountyNotActive,
    BountyNotFound,
    BountyAlreadyCompleted,
}

impl TerminalRevert {
    pub const ALL: [TerminalRevert; 3] =
        [TerminalRevert::BountyNotActive, TerminalRevert::BountyNotFound, TerminalRevert::BountyAlreadyCompleted];

    pub fn signature(&self) -> &'static str {
        match self {
            TerminalRevert::BountyNotActive => "BountyNotActive()",
            TerminalRevert::BountyNotFound => "BountyNotFound()",
            TerminalRevert::BountyAlreadyCompleted => "BountyAlreadyCompleted()",
        }
    }

    pub fn selector(&self) -> [u8; 4] {
        id(self.signature())
    }

    pub fn from_selector(selector: [u8; 4]) -> Option<Self> {
        Self::ALL.into_iter().find(|terminal| terminal.selector() == selector)
    }

    /// Revert payload as the contract would return it.
    pub fn revert_data(&self) -> RevertData {
        RevertData(Bytes::from(self.selector().to_vec()))
    }
}

impl fmt::Display for TerminalRevert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.signature().trim_end_matches("()"))
    }
}
