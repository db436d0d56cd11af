//! Raw account state as received from RPC or WebSocket sources.

use solana_sdk::{account::Account, pubkey::Pubkey};

/// An undecoded on-chain account observed by the indexer.
///
/// Produced by both ingestion paths: the snapshot sync
/// (`getProgramAccounts`, with [`RawAccount::SNAPSHOT_SLOT`]) and live
/// WebSocket notifications (with the notification's context slot).
#[derive(Debug, Clone)]
pub struct RawAccount {
    /// The owning program, which selects the protocol adapter.
    pub program_id: Pubkey,
    /// The account's address.
    pub address: Pubkey,
    /// The full account data, including the leading discriminator.
    pub data: Vec<u8>,
    /// Slot at which this state was observed; `SNAPSHOT_SLOT` on the
    /// initial-sync path where no slot attribution exists.
    pub slot: u64,
}

impl RawAccount {
    /// Slot value marking snapshot-sync accounts.
    pub const SNAPSHOT_SLOT: u64 = 0;

    /// Builds a raw account from an RPC [`Account`], taking ownership of
    /// its data. The program id comes from the account owner.
    #[must_use]
    pub fn from_account(address: Pubkey, account: Account, slot: u64) -> Self {
        Self {
            program_id: account.owner,
            address,
            data: account.data,
            slot,
        }
    }

    /// True when this state came from the snapshot sync rather than a
    /// live notification.
    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        self.slot == Self::SNAPSHOT_SLOT
    }
}
