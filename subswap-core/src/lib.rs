pub mod fee;
pub mod index;
pub mod scanner;
pub mod settlement;
pub mod state;

mod error;
mod script;
mod swap;

pub use error::Error;
pub use error::ErrorContext;
pub use error::ErrorKind;
pub use fee::FeeEstimator;
pub use fee::FeePolicy;
pub use fee::FeePreference;
pub use index::InMemorySwapStore;
pub use index::SwapIndex;
pub use index::SwapStore;
pub use scanner::total_amount;
pub use scanner::ChainClient;
pub use scanner::Utxo;
pub use scanner::UtxoScanner;
pub use scanner::Utxos;
pub use script::derive_swap;
pub use script::SwapScript;
pub use settlement::SettlementBuilder;
pub use settlement::SettlementKind;
pub use settlement::SettlementTransaction;
pub use state::SwapStatus;
pub use swap::parse_hash;
pub use swap::parse_public_key;
pub use swap::KeyRef;
pub use swap::Preimage;
pub use swap::SwapParameters;
pub use swap::SwapRecord;
pub use swap::SwapRole;
pub use swap::COMPRESSED_PUBKEY_SIZE;
pub use swap::PREIMAGE_SIZE;
