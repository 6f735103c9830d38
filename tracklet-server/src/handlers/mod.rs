//! Transport handlers that sit outside the plain REST surface.

pub mod websocket;
