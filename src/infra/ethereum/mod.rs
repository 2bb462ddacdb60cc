pub mod contract;
pub mod mock;
pub mod notary;
pub mod rpc;

pub use mock::MockNotary;
pub use notary::EvmNotary;
pub use rpc::JsonRpcClient;
