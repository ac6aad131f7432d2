//! Owner-Free Filesystem (OFF) storage core.
//!
//! A content-addressed block engine: fixed-size [`block::Block`]s identified
//! by a SHA3-512 [`checksum::Checksum`], combined into [`tuple::Tuple`]s whose
//! bytewise XOR whitens a payload against one or more random blocks, framed
//! into signed [`block::cbl`] manifests, held in a [`store::BlockStore`], and
//! read back out through a lazy [`reconstruct::open`] stream.
//!
//! No single stored block, on its own, reveals anything about the file it
//! came from: every payload block is whitened against at least one other
//! block before it ever reaches a store, and a [`block::cbl::CblContents`] is
//! the only thing that says how to put them back together.

#![warn(unused_crate_dependencies)]

pub mod block;
pub mod checksum;
pub mod error;
pub mod identity;
pub mod magnet;
pub mod pool;
pub mod reconstruct;
pub mod store;
pub mod tuple;

pub use block::{Block, BlockDataType, BlockSize, BlockType};
pub use checksum::Checksum;
pub use error::Error;
pub use pool::{PoolId, PoolOracle};
pub use reconstruct::{open as open_reconstruction, ReconstructionOptions};
pub use store::{BlockStore, BrightenResult, DiskStore, DurabilityLevel, EngineConfig, MemoryStore, PutOptions};
pub use tuple::{check_pool_integrity, make_whitened, new_tuple, recover_payload, xor_reduce, Tuple};
