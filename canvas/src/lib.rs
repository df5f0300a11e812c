//! Viewer engine for the infinite sticky-note board.
//!
//! Builds natively for the headless client and tests, and as WebAssembly for
//! the browser. The engine never talks to a backend directly: everything goes
//! through a [`store::StoreAdapter`], which the host picks at startup.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`engine`] | Per-view wiring and the browser-free [`engine::EngineCore`] |
//! | [`chunk`] | Chunk keys and the visible-rect to chunk-range codec |
//! | [`store`] | Store adapter contract and the local persisted backend |
//! | [`cache`] | Needed/subscribed chunk sets and cached chunk records |
//! | [`presence`] | Latest cursor per participant, filtered by age |
//! | [`motion`] | Drag, inertia, key panning and zoom |
//! | [`compose`] | Note and stamp creation with validation and rate limiting |
//! | [`render`] | Scene assembly and 2D canvas painting |
//! | [`camera`] | Viewport and coordinate conversions |
//! | [`doc`] | Note, stamp and cursor records and snapshot parsing |
//! | [`consts`] | Shared numeric constants |

pub mod cache;
pub mod camera;
pub mod chunk;
pub mod compose;
pub mod consts;
pub mod doc;
pub mod engine;
pub mod motion;
pub mod presence;
pub mod render;
pub mod store;
