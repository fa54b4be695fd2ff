//! Simplified 5G UPF fast path: a static session table, IPv4/UDP/GTP-U
//! codecs, per-packet encap/decap transforms and an RSS-style queue
//! engine that pins every session's traffic to a single worker.

pub mod config;
pub mod fastpath;
pub mod packet;
pub mod queue;
pub mod session;
