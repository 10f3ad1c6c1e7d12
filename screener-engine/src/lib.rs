#![forbid(unsafe_code)]
#![warn(unused, rust_2018_idioms)]

//! # Screener-Engine
//! Distributed technical indicator pipeline for a crypto screener.
//!
//! Components run as independent tokio tasks and only communicate through a [`WorkQueue`],
//! a [`FanOut`] channel and the stores:
//! * [`Scheduler`](scheduler::Scheduler): enqueues one recompute task per active symbol on a
//!   fixed interval.
//! * [`BatchWorker`](worker::BatchWorker): consumes tasks with at-least-once semantics,
//!   computes a multi-timeframe [`IndicatorSnapshot`] and persists it.
//! * [`Shard`](shard::Shard): stateful low-latency alternative, keeping per symbol bar buffers
//!   in memory and updating them from live price updates.
//! * [`Streamer`](streamer::Streamer): ingests live ticks, fans them out and hands candles to
//!   the [`StorageWriter`](writer::StorageWriter).
//! * [`BackfillEngine`](backfill::BackfillEngine): detects & repairs gaps in stored history.
//! * [`BroadcastBridge`](bridge::BroadcastBridge): relays fan-out messages to push clients.
//!
//! [`WorkQueue`]: queue::WorkQueue
//! [`FanOut`]: bus::FanOut
//! [`IndicatorSnapshot`]: snapshot::IndicatorSnapshot

/// Gap detection & historical backfill.
pub mod backfill;

/// Relay of fan-out messages to registered push connections.
pub mod bridge;

/// Fan-out channel & the [`PriceUpdate`](bus::PriceUpdate) wire message.
pub mod bus;

/// Component configuration with defaults & environment overrides.
pub mod config;

/// Shared process state: latest prices & the shutdown signal.
pub mod context;

/// All [`Error`](std::error::Error)s generated in Screener-Engine.
pub mod error;

/// Streaming technical indicators.
pub mod indicator;

/// At-least-once Work Queue with consumer groups.
pub mod queue;

/// In-memory bars & timeframe resampling.
pub mod resample;

/// Periodic task dispatch.
pub mod scheduler;

/// Stateful worker shards.
pub mod shard;

/// Multi-timeframe indicator snapshots.
pub mod snapshot;

/// Candle, status & symbol stores.
pub mod store;

/// Live tick ingestion.
pub mod streamer;

/// Batch indicator workers.
pub mod worker;

/// Buffered candle persistence.
pub mod writer;

pub use error::EngineError;
