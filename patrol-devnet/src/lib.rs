use anyhow::{anyhow, Result};
use lazy_static::lazy_static;

use patrol_chain_data::models::ChainRecord;
use patrol_chain_data::MemoryArchive;
use patrol_utils::keypair::Keypair;

pub const VALIDATOR_COUNT: usize = 5;
pub const NET_UID: u16 = 81;
pub const TAO: u64 = 1_000_000_000;

/// Finalized height of the sample chain.
pub const FINALIZED_HEIGHT: u64 = 100;

/// Moves funds in a burst, was paid by a denylisted account and stakes
/// everything with one delegate.
pub const MULE: &str = "5DevnetMuLeAccountxxxxxxxxxxxxxxxxxxxxxxxxxxx";
/// A few ordinary transfers and evenly split stake.
pub const HONEST: &str = "5DevnetHonestAccountxxxxxxxxxxxxxxxxxxxxxxxxx";
/// Never appears on chain.
pub const QUIET: &str = "5DevnetQuietAccountxxxxxxxxxxxxxxxxxxxxxxxxxx";
pub const MALLORY: &str = "5DevnetMaLLoryAccountxxxxxxxxxxxxxxxxxxxxxxxx";
pub const DELEGATE_A: &str = "5DevnetDelegateAxxxxxxxxxxxxxxxxxxxxxxxxxxxxx";
pub const DELEGATE_B: &str = "5DevnetDelegateBxxxxxxxxxxxxxxxxxxxxxxxxxxxxx";

pub const DENYLIST: &[&str] = &[MALLORY];

lazy_static! {
    static ref KEYPAIRS: Vec<Keypair> = (0..VALIDATOR_COUNT).map(|i| Keypair::from_seed(seed_for(i))).collect();
}

fn seed_for(index: usize) -> [u8; 32] {
    let mut seed = [0u8; 32];
    seed[..8].copy_from_slice(b"patrolv1");
    seed[31] = index as u8;
    seed
}

pub fn sink(index: usize) -> String {
    format!("5DevnetSink{}", index)
}

pub struct Devnet;

impl Default for Devnet {
    fn default() -> Self {
        Self::new()
    }
}

impl Devnet {
    pub fn new() -> Self {
        Self
    }

    pub fn get_keypairs(&self, count: Option<usize>) -> Result<Vec<Keypair>> {
        let count = count.unwrap_or(VALIDATOR_COUNT);
        if count > KEYPAIRS.len() {
            return Err(anyhow!("devnet has only {} validators", KEYPAIRS.len()));
        }
        Ok(KEYPAIRS.iter().take(count).cloned().collect())
    }

    pub fn get_keypair_by_index(&self, index: usize) -> Result<Keypair> {
        KEYPAIRS
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("devnet has no validator {}", index))
    }

    pub fn get_peerids(&self, count: Option<usize>) -> Result<Vec<String>> {
        Ok(self
            .get_keypairs(count)?
            .iter()
            .map(Keypair::as_public_address)
            .collect())
    }

    /// Deterministic activity over blocks 1..=FINALIZED_HEIGHT.
    pub fn sample_records(&self) -> Vec<ChainRecord> {
        let mut records = vec![ChainRecord::transfer(5, 0, timestamp(5), MALLORY, MULE, 50 * TAO)];
        for (i, height) in (10..35).enumerate() {
            records.push(ChainRecord::transfer(height, 0, timestamp(height), MULE, &sink(i % 5), TAO));
        }
        records.push(ChainRecord::stake_added(40, 0, timestamp(40), MULE, DELEGATE_A, NET_UID, 5 * TAO));

        records.push(ChainRecord::transfer(50, 0, timestamp(50), HONEST, "5DevnetCarol", 2 * TAO));
        records.push(ChainRecord::transfer(60, 0, timestamp(60), HONEST, "5DevnetCarol", TAO));
        records.push(ChainRecord::transfer(70, 0, timestamp(70), "5DevnetDave", HONEST, 10 * TAO));
        records.push(ChainRecord::stake_added(80, 0, timestamp(80), HONEST, DELEGATE_A, NET_UID, 2 * TAO));
        records.push(ChainRecord::stake_added(81, 0, timestamp(81), HONEST, DELEGATE_B, NET_UID, 2 * TAO));
        records
    }

    /// An in-memory archive serving `sample_records`, finalized at `FINALIZED_HEIGHT`.
    pub fn archive(&self) -> MemoryArchive {
        let archive = MemoryArchive::with_records(self.sample_records());
        archive.set_finalized(FINALIZED_HEIGHT);
        archive
    }

    pub fn denylist(&self) -> Vec<String> {
        DENYLIST.iter().map(|s| s.to_string()).collect()
    }
}

/// Twelve second blocks from a fixed genesis.
pub fn timestamp(height: u64) -> i64 {
    1_700_000_000_000 + height as i64 * 12_000
}
