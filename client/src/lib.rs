//! Native stickyboard client.
//!
//! | Module        | Role                                                     |
//! |---------------|----------------------------------------------------------|
//! | [`live`]      | `StoreAdapter` over the sync server's websocket          |
//! | [`bootstrap`] | picks live or local at startup, with permanent fallback  |
//! | [`bots`]      | simulated participants for offline sessions              |
//! | [`session`]   | headless viewer loop over `canvas::engine::EngineCore`   |
//! | [`commands`]  | subcommand bodies                                        |
//! | [`config`]    | clap flags with environment fallbacks                    |

pub mod bootstrap;
pub mod bots;
pub mod commands;
pub mod config;
pub mod live;
pub mod session;
