//! Transaction relay: store, simulated apply engine and live event stream.
//!
//! ## Overview
//!
//! Transactions (proposed code patches) live in an in-memory store. Asking to
//! apply one starts a timed simulation that walks it through its lifecycle;
//! every mutation is fanned out to subscribers and streamed to clients over
//! Server-Sent Events. Clients fold the stream into a local view and group it
//! for display.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │ client.rs│ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘   SSE    │         │                                        │
//!      │                │         │ SimulationEngine::start_simulation()   │
//!      │                │         v                                        │
//!      │                │  simulation.rs  (active-run guard, timers)       │
//!      │                │         │                                        │
//!      │                │         │ TransactionStore::settle()             │
//!      │                │         v                                        │
//!      │                │  store.rs  ──notify──>  broadcaster.rs           │
//!      │                │                              │                   │
//!      │                │                              v                   │
//!      │                │  stream.rs  (one Subscription per connection)    │
//!      │                └──────────────────────────────────────────────────┘
//!      v
//!  chain.rs  (grouping + parent/child threading of the local view)
//! ```
//!
//! ## Supporting Modules
//!
//! | Module   | Responsibility                                             |
//! |----------|------------------------------------------------------------|
//! | `models` | `Transaction`, `Block`, status enums, stream events        |
//! | `seed`   | Built-in demo data and `--seed` file loading               |

pub mod api;
pub mod broadcaster;
pub mod chain;
pub mod client;
pub mod models;
pub mod seed;
pub mod server;
pub mod simulation;
pub mod store;
pub mod stream;
