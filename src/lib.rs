//! # rpool - A First-Fit Free-List Memory Pool
//!
//! This crate provides a **first-fit free-list allocator**: it hands out
//! variably-sized, individually releasable blocks from chunks obtained from
//! the system allocator, and recycles released blocks internally.
//!
//! ## Overview
//!
//! ```text
//!   Free-List Concept:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                          POOL MEMORY                                 │
//!   │                                                                      │
//!   │   ┌─────┬──────────┬─────┬─────────────┬─────┬───────────────────┐   │
//!   │   │ A1  │  free    │ A2  │    free     │ A3  │      free         │   │
//!   │   └─────┴──────────┴─────┴─────────────┴─────┴───────────────────┘   │
//!   │            │                  ▲ │                  ▲                 │
//!   │            └──────────────────┘ └──────────────────┘                 │
//!   │                                                                      │
//!   │   head ──► lowest-address free block; links follow address order.    │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Allocation walks the list and takes the FIRST block that fits.
//!   Release re-inserts in address order and merges adjacent neighbours.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rpool
//!   ├── align      - Granularity rounding macro (align!)
//!   ├── block      - Block references, header codec, handles
//!   ├── chunk      - Chunk ownership and the system-allocator seam
//!   ├── error      - Typed handle errors
//!   └── pool       - Pool: allocate / release / diagnostics
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use rpool::Pool;
//!
//! let mut pool = Pool::new();
//!
//! // Allocate 100 bytes; sizes round up to the 16-byte granule.
//! let handle = pool.allocate(100);
//! assert_eq!(pool.data(handle).unwrap().len(), 112);
//!
//! // Use the memory.
//! pool.data_mut(handle).unwrap().fill(0xab);
//!
//! // Release it; the block goes back on the free list.
//! pool.release(Some(handle)).unwrap();
//!
//! // Releasing twice is caught instead of corrupting the pool.
//! assert!(pool.release(Some(handle)).is_err());
//! ```
//!
//! ## How It Works
//!
//! Every block carries a 16-byte header ahead of its payload:
//!
//! ```text
//!   Single Block:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │           Payload              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ link: next/gen  │  │  │     N bytes usable       │  │
//!   │  └─────────────────┘  │  │                          │  │
//!   │      16 bytes         │  └──────────────────────────┘  │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── What a Handle resolves to
//! ```
//!
//! Blocks live inside chunks and are addressed by `(chunk, offset)`
//! references instead of raw pointers; the free-list links in the headers
//! are encoded references too. While a block is handed out, its link word
//! instead holds the generation stamped into the [`Handle`], which is how
//! double and stale releases are detected.
//!
//! When no free block fits, the pool grows by one chunk of at least
//! [`DEFAULT_CHUNK`] bytes (configurable per pool) from its
//! [`ChunkSource`] - by default the C allocator. Chunks are never returned
//! early; they go back to the source when the pool is dropped.
//!
//! ## Features
//!
//! - **First-fit with address-ordered coalescing**: released neighbours
//!   merge immediately, keeping fragmentation local.
//! - **Typed handles**: double, stale and foreign releases come back as
//!   [`HandleError`] values instead of undefined behavior.
//! - **No global state**: every [`Pool`] is an independent value.
//! - **Pluggable growth**: any [`ChunkSource`] can back a pool, which is
//!   also how the tests observe growth behavior.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: a pool must be externally serialized to be
//!   shared.
//! - **Fixed granularity**: payload sizes round up to 16 bytes; there is no
//!   finer alignment control.
//! - **No shrinking**: reserved memory only grows until the pool is
//!   dropped.
//! - **Fatal exhaustion**: a failed growth request panics rather than
//!   degrading.

pub mod align;
mod block;
mod chunk;
mod error;
mod pool;

pub use block::{HEADER_SIZE, Handle};
pub use chunk::{Chunk, ChunkSource, SystemSource};
pub use error::HandleError;
pub use pool::{DEFAULT_CHUNK, GRANULE, Pool, Stats};
