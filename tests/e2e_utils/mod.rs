#![cfg(test)]
#![allow(dead_code)]
#![allow(unused_imports)]

pub mod intermediate_proxy;
pub mod nanoproxy_server;
pub mod proxy_chain_fixture;
pub mod single_shot_server;

pub use intermediate_proxy::IntermediateProxy;
pub use nanoproxy_server::TestNanoproxyServer;
pub use proxy_chain_fixture::{ProxyChainFixture, create_pac_script};
pub use single_shot_server::SingleShotServer;
