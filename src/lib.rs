// SPDX-License-Identifier: Apache-2.0
pub mod allow_list;
pub mod client_ip;
pub mod config;
pub mod duration;
pub mod engine;
pub mod logging;
pub mod memory_session_store;
pub mod middleware;
pub mod proxy;
pub mod redis_session_store;
pub mod registry;
pub mod rewrite;
pub mod session_store;
