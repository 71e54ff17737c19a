//! Wallet session
//!
//! The connected account and chain live here, injected where needed as
//! `Arc<Session>` rather than read from a global.

use parking_lot::RwLock;
use splitpool_common::Address;
use tracing::info;

use crate::error::{ClientError, ClientResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Connection {
    account: Address,
    chain_id: u64,
}

#[derive(Debug)]
pub struct Session {
    expected_chain: u64,
    connection: RwLock<Option<Connection>>,
}

impl Session {
    /// A disconnected session that only accepts `expected_chain`
    pub fn new(expected_chain: u64) -> Self {
        Self {
            expected_chain,
            connection: RwLock::new(None),
        }
    }

    pub fn expected_chain(&self) -> u64 {
        self.expected_chain
    }

    pub fn connect(&self, account: Address, chain_id: u64) -> ClientResult<()> {
        if chain_id != self.expected_chain {
            return Err(ClientError::WrongChain {
                expected: self.expected_chain,
                actual: chain_id,
            });
        }
        if account.is_zero() {
            return Err(ClientError::Validation(
                splitpool_common::SplitError::InvalidAddress {
                    reason: "zero account",
                },
            ));
        }
        *self.connection.write() = Some(Connection { account, chain_id });
        info!(%account, chain_id, "wallet connected");
        Ok(())
    }

    pub fn disconnect(&self) {
        if self.connection.write().take().is_some() {
            info!("wallet disconnected");
        }
    }

    pub fn account(&self) -> Option<Address> {
        self.connection.read().map(|c| c.account)
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.connection.read().map(|c| c.chain_id)
    }

    pub fn require_account(&self) -> ClientResult<Address> {
        self.account().ok_or(ClientError::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.read().is_some()
    }
}
