//! CLI command implementations.
//!
//! Each submodule owns one `Commands` variant:
//!
//! | Module   | Commands handled                                    |
//! |----------|-----------------------------------------------------|
//! | `serve`  | `Serve`                                             |
//! | `watch`  | `Watch`                                             |
//! | `groups` | `Groups`                                            |

pub mod groups;
pub mod serve;
pub mod watch;

pub use groups::cmd_groups;
pub use serve::cmd_serve;
pub use watch::cmd_watch;
